//! Certificate authority, generated certificate and SSL certificate commands.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::{anyhow, bail, Context as _};
use chrono::{DateTime, Utc};
use regex::Regex;

use super::Context;
use crate::api::{CertificateAuthority, DeployedCertificate, SslCertificate};
use crate::options::{Bound, CommandSpec, ConfigMode, OptionSpec};
use crate::presenters::{render_json, Presenter, Tabular, FORMAT_OPTION};

pub const ACTIVATE_CERTIFICATE_AUTHORITY: CommandSpec = CommandSpec {
    name: "activate-certificate-authority",
    summary: "activates a certificate authority on the Ops Manager",
    description: "This authenticated command activates an existing certificate authority on the Ops Manager",
    options: &[OptionSpec::string("id", "certificate authority id").required()],
    config: ConfigMode::None,
};

pub const CERTIFICATE_AUTHORITIES: CommandSpec = CommandSpec {
    name: "certificate-authorities",
    summary: "lists certificates managed by Ops Manager",
    description: "lists certificates managed by Ops Manager",
    options: &[FORMAT_OPTION],
    config: ConfigMode::None,
};

pub const CERTIFICATE_AUTHORITY: CommandSpec = CommandSpec {
    name: "certificate-authority",
    summary: "prints requested certificate authority",
    description: "prints requested certificate authority",
    options: &[
        OptionSpec::string("id", "certificate authority id").required(),
        OptionSpec::flag("cert-pem", "Display the cert pem"),
        FORMAT_OPTION,
    ],
    config: ConfigMode::None,
};

pub const CREATE_CERTIFICATE_AUTHORITY: CommandSpec = CommandSpec {
    name: "create-certificate-authority",
    summary: "creates a certificate authority on the Ops Manager",
    description: "This authenticated command creates a certificate authority on the Ops Manager with the given cert and key",
    options: &[
        OptionSpec::string("certificate-pem", "certificate").required(),
        OptionSpec::string("private-key-pem", "private key").required(),
        FORMAT_OPTION,
    ],
    config: ConfigMode::Flags,
};

pub const DELETE_CERTIFICATE_AUTHORITY: CommandSpec = CommandSpec {
    name: "delete-certificate-authority",
    summary: "deletes a certificate authority on the Ops Manager",
    description: "This authenticated command deletes an existing certificate authority on the Ops Manager",
    options: &[OptionSpec::string("id", "certificate authority id").required()],
    config: ConfigMode::None,
};

pub const GENERATE_CERTIFICATE: CommandSpec = CommandSpec {
    name: "generate-certificate",
    summary: "generates a new certificate signed by Ops Manager's root CA",
    description: "This authenticated command generates a new RSA public/private certificate signed by Ops Manager's root CA certificate",
    options: &[OptionSpec::repeated(
        "domains",
        "domains to generate certificates, delimited by comma, can include wildcard domains",
    )
    .short('d')
    .required()],
    config: ConfigMode::None,
};

pub const GENERATE_CERTIFICATE_AUTHORITY: CommandSpec = CommandSpec {
    name: "generate-certificate-authority",
    summary: "generates a certificate authority on the Opsman",
    description: "This authenticated command generates a certificate authority on the Ops Manager",
    options: &[FORMAT_OPTION],
    config: ConfigMode::None,
};

pub const REGENERATE_CERTIFICATES: CommandSpec = CommandSpec {
    name: "regenerate-certificates",
    summary: "deletes all non-configurable certificates in Ops Manager so they will automatically be regenerated on the next apply-changes",
    description: "This authenticated command deletes all non-configurable certificates in Ops Manager so they will automatically be regenerated on the next apply-changes",
    options: &[],
    config: ConfigMode::None,
};

pub const SSL_CERTIFICATE: CommandSpec = CommandSpec {
    name: "ssl-certificate",
    summary: "gets certificate applied to Ops Manager",
    description: "This authenticated command gets certificate applied to Ops Manager",
    options: &[FORMAT_OPTION],
    config: ConfigMode::None,
};

pub const UPDATE_SSL_CERTIFICATE: CommandSpec = CommandSpec {
    name: "update-ssl-certificate",
    summary: "**DEPRECATED** updates the SSL Certificate on the Ops Manager. Use configure-opsman instead.",
    description: "***DEPRECATED*** This authenticated command updates the SSL Certificate on the Ops Manager with the given cert and key. Use configure-opsman instead.",
    options: &[
        OptionSpec::string("certificate-pem", "certificate text").required(),
        OptionSpec::string("private-key-pem", "private key text").required(),
    ],
    config: ConfigMode::Flags,
};

pub const DELETE_SSL_CERTIFICATE: CommandSpec = CommandSpec {
    name: "delete-ssl-certificate",
    summary: "deletes certificate applied to Ops Manager",
    description: "This authenticated command deletes a custom certificate applied to Ops Manager and reverts to the auto-generated cert",
    options: &[],
    config: ConfigMode::None,
};

pub const EXPIRING_CERTIFICATES: CommandSpec = CommandSpec {
    name: "expiring-certificates",
    summary: "lists expiring certificates from the Ops Manager targeted",
    description: "returns a list of expiring certificates from an existing Ops Manager",
    options: &[OptionSpec::string(
        "expires-within",
        "timeframe in which to check expiration. Default: \"3m\".\n\t\t\t\tdays(d), weeks(w), months(m) and years(y) supported.",
    )
    .short('e')
    .default("3m")],
    config: ConfigMode::None,
};

static EXPIRES_WITHIN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[1-9]+\d*[dwmy]$").unwrap());

impl Tabular for CertificateAuthority {
    fn headers() -> Vec<&'static str> {
        vec!["id", "issuer", "active", "created on", "expires on", "certificate pem"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.guid.clone(),
            self.issuer.clone(),
            self.active.to_string(),
            self.created_on.clone(),
            self.expires_on.clone(),
            self.cert_pem.clone(),
        ]
    }
}

impl Tabular for SslCertificate {
    fn headers() -> Vec<&'static str> {
        vec!["Certificate"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.certificate.clone()]
    }
}

pub async fn activate_certificate_authority(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let id = options.string("id");
    ctx.api()?.activate_certificate_authority(&id).await?;
    ctx.console.println(format!("Certificate authority '{id}' activated"));
    Ok(())
}

pub async fn certificate_authorities(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let presenter = Presenter::from_options(&ctx.console, options)?;
    let authorities = ctx.api()?.list_certificate_authorities().await?;
    presenter.list(&authorities)?;
    Ok(())
}

pub async fn certificate_authority(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let presenter = Presenter::from_options(&ctx.console, options)?;
    let id = options.string("id");
    let authorities = ctx.api()?.list_certificate_authorities().await?;
    let authority = authorities
        .into_iter()
        .find(|ca| ca.guid == id)
        .ok_or_else(|| anyhow!("could not find a certificate authority with ID: {id:?}"))?;

    if options.flag("cert-pem") {
        ctx.console.println(&authority.cert_pem);
        return Ok(());
    }
    presenter.list(std::slice::from_ref(&authority))?;
    Ok(())
}

pub async fn create_certificate_authority(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let presenter = Presenter::from_options(&ctx.console, options)?;
    let authority = ctx
        .api()?
        .create_certificate_authority(&options.string("certificate-pem"), &options.string("private-key-pem"))
        .await?;
    presenter.list(std::slice::from_ref(&authority))?;
    Ok(())
}

pub async fn delete_certificate_authority(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let id = options.string("id");
    ctx.api()?.delete_certificate_authority(&id).await?;
    ctx.console.println(format!("Certificate authority '{id}' deleted"));
    Ok(())
}

/// Split every `--domains` value on commas.
fn domains(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect()
}

pub async fn generate_certificate(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let certificate = ctx
        .api()?
        .generate_certificate(&domains(options.list("domains")))
        .await?;
    ctx.console.println(render_json(&certificate)?);
    Ok(())
}

pub async fn generate_certificate_authority(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let presenter = Presenter::from_options(&ctx.console, options)?;
    let authority = ctx.api()?.generate_certificate_authority().await?;
    presenter.list(std::slice::from_ref(&authority))?;
    Ok(())
}

pub async fn regenerate_certificates(ctx: &Context, _options: &Bound) -> anyhow::Result<()> {
    ctx.api()?.regenerate_certificates().await?;
    ctx.console.println("Certificates regenerated.");
    Ok(())
}

pub async fn ssl_certificate(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let presenter = Presenter::from_options(&ctx.console, options)?;
    let certificate = ctx.api()?.ssl_certificate().await?;
    presenter.list(std::slice::from_ref(&certificate))?;
    Ok(())
}

pub async fn update_ssl_certificate(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    ctx.api()?
        .update_ssl_certificate(&options.string("certificate-pem"), &options.string("private-key-pem"))
        .await?;
    ctx.console.println("Successfully applied custom SSL Certificate.");
    ctx.console.println("Please allow about 1 min for the new certificate to take effect.");
    Ok(())
}

pub async fn delete_ssl_certificate(ctx: &Context, _options: &Bound) -> anyhow::Result<()> {
    ctx.api()?.delete_ssl_certificate().await?;
    ctx.console.println("Successfully deleted custom SSL Certificate and reverted to the provided self-signed SSL certificate.");
    ctx.console.println("Please allow about 1 min for the new certificate to take effect.");
    Ok(())
}

/// `ops_manager` reads as `Ops Manager`.
pub(crate) fn title_case(raw: &str) -> String {
    raw.split(['_', ' '])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn expiry(valid_until: &str) -> String {
    DateTime::parse_from_rfc3339(valid_until)
        .map(|d| d.with_timezone(&Utc).format("%d %b %y %H:%M UTC").to_string())
        .unwrap_or_else(|_| valid_until.to_string())
}

pub async fn expiring_certificates(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let within = options.str("expires-within").unwrap_or("3m");
    if !EXPIRES_WITHIN.is_match(within) {
        bail!("only d,w,m, or y are supported. Default is \"3m\"");
    }

    ctx.console.println("Getting expiring certificates...");
    let certificates = ctx
        .api()?
        .expiring_certificates(within)
        .await
        .context("could not fetch expiring certificates")?;
    if certificates.is_empty() {
        ctx.console
            .println(ctx.console.green(&format!("[✓] No certificates are expiring in {within}")));
        return Ok(());
    }

    let mut by_variable: BTreeMap<String, Vec<&DeployedCertificate>> = BTreeMap::new();
    let mut by_product: BTreeMap<String, BTreeMap<&str, Vec<&DeployedCertificate>>> = BTreeMap::new();
    for certificate in &certificates {
        let location = title_case(&certificate.location);
        if certificate.variable_path.is_empty() {
            by_product
                .entry(location)
                .or_default()
                .entry(certificate.product_guid.as_str())
                .or_default()
                .push(certificate);
        } else {
            by_variable.entry(location).or_default().push(certificate);
        }
    }

    let red = |line: String| ctx.console.println(ctx.console.red(&line));
    for (location, certificates) in by_variable {
        red(format!("[X] {location}"));
        for certificate in certificates {
            red(format!(
                "    {}: expiring on {}",
                certificate.variable_path,
                expiry(&certificate.valid_until)
            ));
        }
    }
    for (location, products) in by_product {
        red(format!("[X] {location}"));
        for (guid, certificates) in products {
            red(format!("    {guid}:"));
            for certificate in certificates {
                red(format!(
                    "        {}: expiring on {}",
                    certificate.property_reference,
                    expiry(&certificate.valid_until)
                ));
            }
        }
    }

    bail!("found expiring certs in the foundation")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::Harness;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, ResponseTemplate};

    fn authorities() -> serde_json::Value {
        json!({"certificate_authorities": [
            {"guid": "some-guid", "issuer": "Pivotal", "created_on": "2017-01-09", "expires_on": "2021-01-09", "active": true, "cert_pem": "-----BEGIN CERTIFICATE-----\nMIIC+zCCAeOgAwIBAgI...."},
            {"guid": "other-guid", "issuer": "Pivotal", "created_on": "2017-01-10", "expires_on": "2021-01-10", "active": false, "cert_pem": "-----BEGIN CERTIFICATE-----\nMIIC+zCCAeOgAwIBBhI...."},
        ]})
    }

    #[tokio::test]
    async fn test_certificate_authority_prints_pem() {
        let harness = Harness::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v0/certificate_authorities"))
            .respond_with(ResponseTemplate::new(200).set_body_json(authorities()))
            .mount(&harness.server)
            .await;

        harness
            .run(&CERTIFICATE_AUTHORITY, &["--id", "other-guid", "--cert-pem"])
            .await
            .unwrap();
        assert_eq!(harness.stdout(), "-----BEGIN CERTIFICATE-----\nMIIC+zCCAeOgAwIBBhI....\n");

        let err = harness
            .run(&CERTIFICATE_AUTHORITY, &["--id", "doesnt-exist"])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not find a certificate authority with ID: \"doesnt-exist\""
        );
    }

    #[tokio::test]
    async fn test_certificate_authorities_json() {
        let harness = Harness::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v0/certificate_authorities"))
            .respond_with(ResponseTemplate::new(200).set_body_json(authorities()))
            .mount(&harness.server)
            .await;

        harness
            .run(&CERTIFICATE_AUTHORITIES, &["--format", "json"])
            .await
            .unwrap();
        let printed: serde_json::Value = serde_json::from_str(&harness.stdout()).unwrap();
        assert_eq!(printed[1]["guid"], "other-guid");
        assert_eq!(printed[0]["active"], true);
    }

    #[tokio::test]
    async fn test_activate() {
        let harness = Harness::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/certificate_authorities/some-guid/activate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&harness.server)
            .await;

        harness
            .run(&ACTIVATE_CERTIFICATE_AUTHORITY, &["--id", "some-guid"])
            .await
            .unwrap();
        assert_eq!(harness.stdout(), "Certificate authority 'some-guid' activated\n");
    }

    #[tokio::test]
    async fn test_generate_certificate_joins_domains() {
        let harness = Harness::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/certificates/generate"))
            .and(body_json(json!({"domains": [
                "*.apps.example.com", "*.sys.example.com", "opsmanager.example.com"
            ]})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"certificate": "cert", "key": "key"})),
            )
            .expect(1)
            .mount(&harness.server)
            .await;

        harness
            .run(
                &GENERATE_CERTIFICATE,
                &["--domains", "*.apps.example.com, *.sys.example.com", "--domains", "opsmanager.example.com"],
            )
            .await
            .unwrap();
        assert!(harness.stdout().contains("\"certificate\": \"cert\""));
    }

    #[tokio::test]
    async fn test_expiring_certificates_groups_by_location() {
        let harness = Harness::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v0/deployed/certificates"))
            .and(query_param("expires_within", "1w"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"certificates": [
                {"location": "ops_manager", "variable_path": "/opsmgr/bosh_dns/tls_ca", "valid_until": "2020-08-13T19:03:04Z"},
                {"location": "credhub", "product_guid": "cf-guid", "property_reference": ".uaa.service_provider_key_credentials", "valid_until": "2020-08-13T19:03:04Z"},
            ]})))
            .mount(&harness.server)
            .await;

        let err = harness
            .run(&EXPIRING_CERTIFICATES, &["--expires-within", "1w"])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "found expiring certs in the foundation");
        let out = harness.stdout();
        assert!(out.contains("[X] Ops Manager\n    /opsmgr/bosh_dns/tls_ca: expiring on 13 Aug 20 19:03 UTC"));
        assert!(out.contains("[X] Credhub\n    cf-guid:\n        .uaa.service_provider_key_credentials: expiring on"));
    }

    #[tokio::test]
    async fn test_expiring_certificates_rejects_unit() {
        let harness = Harness::start().await;
        let err = harness
            .run(&EXPIRING_CERTIFICATES, &["-e", "3h"])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "only d,w,m, or y are supported. Default is \"3m\"");
    }

    #[tokio::test]
    async fn test_no_expiring_certificates() {
        let harness = Harness::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v0/deployed/certificates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"certificates": []})))
            .mount(&harness.server)
            .await;

        harness.run(&EXPIRING_CERTIFICATES, &[]).await.unwrap();
        assert!(harness.stdout().ends_with("[✓] No certificates are expiring in 3m\n"));
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("ops_manager"), "Ops Manager");
        assert_eq!(title_case("credhub"), "Credhub");
    }
}
