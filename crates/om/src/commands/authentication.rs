//! First-boot authentication setup: internal userstore, LDAP or SAML.

use anyhow::{bail, Context as _};
use serde_json::{json, Value};

use super::Context;
use crate::api::{Api, Availability, IdentityProvider, SetupInput};
use crate::options::{Bound, CommandSpec, ConfigMode, OptionSpec};

const PASSPHRASE: OptionSpec =
    OptionSpec::string("decryption-passphrase", "passphrase used to encrypt the installation").required();
const HTTP_PROXY: OptionSpec =
    OptionSpec::string("http-proxy-url", "proxy for outbound HTTP network traffic");
const HTTPS_PROXY: OptionSpec =
    OptionSpec::string("https-proxy-url", "proxy for outbound HTTPS network traffic");
const NO_PROXY: OptionSpec = OptionSpec::string(
    "no-proxy",
    "comma-separated list of hosts that do not go through the proxy",
);
const SKIP_BOSH_ADMIN_CLIENT: OptionSpec = OptionSpec::flag(
    "skip-create-bosh-admin-client",
    "by default, this command creates a UAA client on the Bosh Director, whose credentials can be passed to the BOSH CLI to execute BOSH commands. This flag skips that.",
);
const PRECREATED_CLIENT_SECRET: OptionSpec = OptionSpec::string(
    "precreated-client-secret",
    "create a UAA client on the Ops Manager vm. The client_secret will be the value provided to this option",
);

pub const CONFIGURE_AUTHENTICATION: CommandSpec = CommandSpec {
    name: "configure-authentication",
    summary: "configures Ops Manager with an internal userstore and admin user account",
    description: "This unauthenticated command helps setup the internal userstore authentication mechanism for your Ops Manager.",
    options: &[
        OptionSpec::string("username", "admin username").short('u').env("OM_USERNAME").required(),
        OptionSpec::string("password", "admin password").short('p').env("OM_PASSWORD").required(),
        PASSPHRASE,
        HTTP_PROXY,
        HTTPS_PROXY,
        NO_PROXY,
    ],
    config: ConfigMode::Flags,
};

pub const CONFIGURE_LDAP_AUTHENTICATION: CommandSpec = CommandSpec {
    name: "configure-ldap-authentication",
    summary: "configures Ops Manager with LDAP authentication",
    description: "This unauthenticated command helps setup the authentication mechanism for your Ops Manager with LDAP.",
    options: &[
        PASSPHRASE,
        HTTP_PROXY,
        HTTPS_PROXY,
        NO_PROXY,
        OptionSpec::string("email-attribute", "name of the LDAP attribute that contains the users email address").required(),
        OptionSpec::string("group-search-base", "start point for a user group membership search, and sequential nested searches").required(),
        OptionSpec::string("group-search-filter", "search filter to find the groups to which a user belongs, e.g. 'member={0}'").required(),
        OptionSpec::string("ldap-password", "password for ldap-username DN").required(),
        OptionSpec::string("ldap-rbac-admin-group-name", "the name of LDAP group whose members should be considered admins of OpsManager").required(),
        OptionSpec::string("ldap-referrals", "configure the UAA LDAP referral behavior").required(),
        OptionSpec::string("ldap-username", "DN for the LDAP credentials used to search the directory").required(),
        OptionSpec::string("server-ssl-cert", "the server certificate when using ldaps://"),
        OptionSpec::string("server-url", "URL to the ldap server, must start with ldap:// or ldaps://").required(),
        OptionSpec::string("user-search-base", "a base at which the search starts, e.g. 'ou=users,dc=mycompany,dc=com'").required(),
        OptionSpec::string("user-search-filter", "search filter used for the query. Takes one parameter, user ID defined as {0}. e.g. 'cn={0}'").required(),
        SKIP_BOSH_ADMIN_CLIENT,
        PRECREATED_CLIENT_SECRET,
    ],
    config: ConfigMode::Flags,
};

pub const CONFIGURE_SAML_AUTHENTICATION: CommandSpec = CommandSpec {
    name: "configure-saml-authentication",
    summary: "configures Ops Manager with SAML authentication",
    description: "This unauthenticated command helps setup the authentication mechanism for your Ops Manager with SAML.",
    options: &[
        PASSPHRASE,
        HTTP_PROXY,
        HTTPS_PROXY,
        NO_PROXY,
        OptionSpec::string("saml-idp-metadata", "XML, or URL to XML, for the IDP that Ops Manager should use").required(),
        OptionSpec::string("saml-bosh-idp-metadata", "XML, or URL to XML, for the IDP that BOSH should use").required(),
        OptionSpec::string("saml-rbac-admin-group", "If SAML is specified, please provide the admin group for your SAML").required(),
        OptionSpec::string("saml-rbac-groups-attribute", "If SAML is specified, please provide the groups attribute for your SAML").required(),
        SKIP_BOSH_ADMIN_CLIENT,
        PRECREATED_CLIENT_SECRET,
    ],
    config: ConfigMode::Flags,
};

const BOSH_ADMIN_CLIENT_CREATED: &str = "
BOSH admin client will be created when the director is deployed.
The client secret can then be found in the Ops Manager UI:
director tile -> Credentials tab -> click on 'Link to Credential' for 'Uaa Bosh Client Credentials'
Note both the client ID and secret.
";

const BOSH_ADMIN_CLIENT_UNSUPPORTED: &str = "
Note: BOSH admin client NOT automatically created.
This is only supported in OpsManager 2.4 and up.
";

const BOSH_ADMIN_CLIENT_SKIPPED: &str = "
Note: BOSH admin client NOT automatically created.
This was skipped due to the 'skip-create-bosh-admin-client' flag.
";

const PRECREATED_CLIENT_CREATED: &str = "
Ops Manager UAA client will be created when authentication system starts.
It will have the username 'precreated-client' and the client secret you provided.
";

/// Whether setup still has to run. Logs and returns false when it already ran.
async fn needs_setup(ctx: &Context, api: &Api) -> anyhow::Result<bool> {
    let availability = api
        .ensure_availability()
        .await
        .context("could not determine initial configuration status")?;
    if availability == Availability::Unstarted {
        Ok(true)
    } else {
        ctx.console
            .println("configuration previously completed, skipping configuration");
        Ok(false)
    }
}

/// Submit `input` and wait until the login page stops reporting setup.
async fn setup_and_wait(ctx: &Context, api: &Api, input: &SetupInput) -> anyhow::Result<()> {
    api.setup(input)
        .await
        .context("could not configure authentication")?;

    ctx.console.println("waiting for configuration to complete...");
    loop {
        let availability = api
            .ensure_availability()
            .await
            .context("could not determine final configuration status")?;
        if availability == Availability::Complete {
            break;
        }
        tokio::time::sleep(ctx.poll_interval).await;
    }
    ctx.console.println("configuration complete");
    Ok(())
}

fn base_input(provider: IdentityProvider, options: &Bound) -> SetupInput {
    let mut input = SetupInput::new(provider, &options.string("decryption-passphrase"));
    input.http_proxy_url = options.string("http-proxy-url");
    input.https_proxy_url = options.string("https-proxy-url");
    input.no_proxy = options.string("no-proxy");
    input
}

/// Add the UAA client settings an external provider supports on this
/// appliance version and return the notes to print afterwards.
async fn client_settings(
    api: &Api,
    options: &Bound,
    input: &mut SetupInput,
) -> anyhow::Result<(&'static str, &'static str)> {
    let info = api.info().await?;
    let skip = options.flag("skip-create-bosh-admin-client");

    let mut bosh_note = if info.version_at_least(2, 4)? {
        input
            .extra
            .insert("create_bosh_admin_client".into(), Value::Bool(!skip));
        BOSH_ADMIN_CLIENT_CREATED
    } else {
        BOSH_ADMIN_CLIENT_UNSUPPORTED
    };
    if skip {
        bosh_note = BOSH_ADMIN_CLIENT_SKIPPED;
    }

    let mut client_note = "";
    if let Some(secret) = options.str("precreated-client-secret") {
        if !info.version_at_least(2, 5)? {
            bail!("\nCannot use the \"--precreated-client-secret\" argument.\nThis is only supported in OpsManager 2.5 and up.\n");
        }
        input
            .extra
            .insert("precreated_client_secret".into(), json!(secret));
        client_note = PRECREATED_CLIENT_CREATED;
    }
    Ok((bosh_note, client_note))
}

pub async fn configure_authentication(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let api = ctx.api()?;
    if !needs_setup(ctx, &api).await? {
        return Ok(());
    }

    ctx.console.println("configuring internal userstore...");
    let mut input = base_input(IdentityProvider::Internal, options);
    input.admin_user_name = options.string("username");
    input.admin_password = options.string("password");
    input.admin_password_confirmation = options.string("password");

    setup_and_wait(ctx, &api, &input).await
}

pub async fn configure_ldap_authentication(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let api = ctx.api()?;
    if !needs_setup(ctx, &api).await? {
        return Ok(());
    }

    ctx.console.println("configuring LDAP authentication...");
    let mut input = base_input(IdentityProvider::Ldap, options);
    input.extra.insert(
        "ldap_settings".into(),
        json!({
            "email_attribute": options.string("email-attribute"),
            "group_search_base": options.string("group-search-base"),
            "group_search_filter": options.string("group-search-filter"),
            "ldap_password": options.string("ldap-password"),
            "ldap_rbac_admin_group_name": options.string("ldap-rbac-admin-group-name"),
            "ldap_referrals": options.string("ldap-referrals"),
            "ldap_username": options.string("ldap-username"),
            "server_ssl_cert": options.string("server-ssl-cert"),
            "server_url": options.string("server-url"),
            "user_search_base": options.string("user-search-base"),
            "user_search_filter": options.string("user-search-filter"),
        }),
    );
    let (bosh_note, client_note) = client_settings(&api, options, &mut input).await?;

    setup_and_wait(ctx, &api, &input).await?;
    ctx.console.print(bosh_note);
    ctx.console.print(client_note);
    Ok(())
}

pub async fn configure_saml_authentication(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let api = ctx.api()?;
    if !needs_setup(ctx, &api).await? {
        return Ok(());
    }

    ctx.console.println("configuring SAML authentication...");
    let mut input = base_input(IdentityProvider::Saml, options);
    for (key, flag) in [
        ("idp_metadata", "saml-idp-metadata"),
        ("bosh_idp_metadata", "saml-bosh-idp-metadata"),
        ("rbac_saml_admin_group", "saml-rbac-admin-group"),
        ("rbac_saml_groups_attribute", "saml-rbac-groups-attribute"),
    ] {
        input.extra.insert(key.into(), json!(options.string(flag)));
    }
    let (bosh_note, client_note) = client_settings(&api, options, &mut input).await?;

    setup_and_wait(ctx, &api, &input).await?;
    ctx.console.print(bosh_note);
    ctx.console.print(client_note);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::Harness;
    use std::io::Write;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn redirect(to: &str) -> ResponseTemplate {
        ResponseTemplate::new(302).insert_header("Location", to)
    }

    async fn mount_availability(harness: &Harness, pending: u64) {
        Mock::given(method("GET"))
            .and(path("/login/ensure_availability"))
            .respond_with(redirect("/setup"))
            .up_to_n_times(1)
            .mount(&harness.server)
            .await;
        if pending > 0 {
            Mock::given(method("GET"))
                .and(path("/login/ensure_availability"))
                .respond_with(ResponseTemplate::new(200).set_body_string(
                    "<html><body>Waiting for authentication system to start...</body></html>",
                ))
                .up_to_n_times(pending)
                .mount(&harness.server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/login/ensure_availability"))
            .respond_with(redirect("/auth/cloudfoundry"))
            .mount(&harness.server)
            .await;
    }

    #[tokio::test]
    async fn test_internal_userstore() {
        let harness = Harness::start().await;
        mount_availability(&harness, 2).await;
        Mock::given(method("POST"))
            .and(path("/api/v0/setup"))
            .and(body_json(json!({"setup": {
                "identity_provider": "internal",
                "admin_user_name": "username",
                "admin_password": "password",
                "admin_password_confirmation": "password",
                "decryption_passphrase": "passphrase",
                "decryption_passphrase_confirmation": "passphrase",
                "eula_accepted": "true",
                "http_proxy": "http://http-proxy.com",
                "https_proxy": "http://https-proxy.com",
                "no_proxy": "10.10.10.10,11.11.11.11",
            }})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&harness.server)
            .await;

        harness
            .run(
                &CONFIGURE_AUTHENTICATION,
                &[
                    "--username", "username",
                    "--password", "password",
                    "--decryption-passphrase", "passphrase",
                    "--http-proxy-url", "http://http-proxy.com",
                    "--https-proxy-url", "http://https-proxy.com",
                    "--no-proxy", "10.10.10.10,11.11.11.11",
                ],
            )
            .await
            .unwrap();

        let out = harness.stdout();
        assert!(out.starts_with("configuring internal userstore...\nwaiting for configuration to complete...\n"));
        assert!(out.ends_with("configuration complete\n"));
    }

    #[tokio::test]
    async fn test_skips_when_already_configured() {
        let harness = Harness::start().await;
        Mock::given(method("GET"))
            .and(path("/login/ensure_availability"))
            .respond_with(redirect("/auth/cloudfoundry"))
            .mount(&harness.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v0/setup"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&harness.server)
            .await;

        harness
            .run(
                &CONFIGURE_AUTHENTICATION,
                &["-u", "username", "-p", "password", "--decryption-passphrase", "passphrase"],
            )
            .await
            .unwrap();
        assert_eq!(
            harness.stdout(),
            "configuration previously completed, skipping configuration\n"
        );
    }

    #[tokio::test]
    async fn test_values_from_config_file() {
        let harness = Harness::start().await;
        mount_availability(&harness, 0).await;
        Mock::given(method("POST"))
            .and(path("/api/v0/setup"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&harness.server)
            .await;

        let mut config = tempfile::NamedTempFile::new().unwrap();
        writeln!(config, "username: from-file\npassword: secret\ndecryption-passphrase: passphrase").unwrap();
        harness
            .run(&CONFIGURE_AUTHENTICATION, &["--config", config.path().to_str().unwrap()])
            .await
            .unwrap();
        assert!(harness.stdout().ends_with("configuration complete\n"));
    }

    #[tokio::test]
    async fn test_setup_failure_is_wrapped() {
        let harness = Harness::start().await;
        mount_availability(&harness, 0).await;
        Mock::given(method("POST"))
            .and(path("/api/v0/setup"))
            .respond_with(ResponseTemplate::new(422).set_body_string("nope"))
            .mount(&harness.server)
            .await;

        let err = harness
            .run(
                &CONFIGURE_AUTHENTICATION,
                &["-u", "username", "-p", "password", "--decryption-passphrase", "passphrase"],
            )
            .await
            .unwrap_err();
        assert!(format!("{err:#}").starts_with(
            "could not configure authentication: request failed: unexpected response from /api/v0/setup"
        ));
    }

    #[tokio::test]
    async fn test_saml_creates_bosh_admin_client() {
        let harness = Harness::start().await;
        mount_availability(&harness, 0).await;
        Mock::given(method("GET"))
            .and(path("/api/v0/info"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"info": {"version": "2.4-build.1"}})),
            )
            .mount(&harness.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v0/setup"))
            .and(body_json(json!({"setup": {
                "identity_provider": "saml",
                "decryption_passphrase": "passphrase",
                "decryption_passphrase_confirmation": "passphrase",
                "eula_accepted": "true",
                "idp_metadata": "https://idp/metadata",
                "bosh_idp_metadata": "https://bosh-idp/metadata",
                "rbac_saml_admin_group": "opsman.full_control",
                "rbac_saml_groups_attribute": "groups",
                "create_bosh_admin_client": true,
            }})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&harness.server)
            .await;

        harness
            .run(
                &CONFIGURE_SAML_AUTHENTICATION,
                &[
                    "--decryption-passphrase", "passphrase",
                    "--saml-idp-metadata", "https://idp/metadata",
                    "--saml-bosh-idp-metadata", "https://bosh-idp/metadata",
                    "--saml-rbac-admin-group", "opsman.full_control",
                    "--saml-rbac-groups-attribute", "groups",
                ],
            )
            .await
            .unwrap();
        assert!(harness
            .stdout()
            .contains("BOSH admin client will be created when the director is deployed."));
    }

    #[tokio::test]
    async fn test_ldap_precreated_client_needs_2_5() {
        let harness = Harness::start().await;
        mount_availability(&harness, 0).await;
        Mock::given(method("GET"))
            .and(path("/api/v0/info"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"info": {"version": "2.4-build.1"}})),
            )
            .mount(&harness.server)
            .await;

        let err = harness
            .run(
                &CONFIGURE_LDAP_AUTHENTICATION,
                &[
                    "--decryption-passphrase", "passphrase",
                    "--email-attribute", "mail",
                    "--group-search-base", "ou=groups",
                    "--group-search-filter", "member={0}",
                    "--ldap-password", "password",
                    "--ldap-rbac-admin-group-name", "admins",
                    "--ldap-referrals", "follow",
                    "--ldap-username", "cn=admin",
                    "--server-url", "ldap://example.com",
                    "--user-search-base", "ou=users",
                    "--user-search-filter", "cn={0}",
                    "--precreated-client-secret", "secret",
                ],
            )
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("This is only supported in OpsManager 2.5 and up."));
    }
}
