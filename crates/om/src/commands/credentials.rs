//! Deployed credential lookups.

use anyhow::{anyhow, bail, Context as _};

use super::Context;
use crate::api::{Api, ApiError, Credential};
use crate::options::{Bound, CommandSpec, ConfigMode, OptionSpec};
use crate::presenters::{Presenter, FORMAT_OPTION};

/// Product name under which the director's own credentials are listed.
const DIRECTOR_PRODUCT: &str = "p-bosh";

pub const CREDENTIAL_REFERENCES: CommandSpec = CommandSpec {
    name: "credential-references",
    summary: "list credential references for a deployed product",
    description: "This authenticated command lists credential references for deployed products.",
    options: &[
        OptionSpec::string("product-name", "name of deployed product").short('p').required(),
        FORMAT_OPTION,
    ],
    config: ConfigMode::None,
};

pub const CREDENTIALS: CommandSpec = CommandSpec {
    name: "credentials",
    summary: "fetch credentials for a deployed product",
    description: "This authenticated command fetches credentials for deployed products.",
    options: &[
        OptionSpec::string("product-name", "name of deployed product").short('p').required(),
        OptionSpec::string("credential-reference", "name of credential reference").short('c').required(),
        OptionSpec::string("credential-field", "single credential field to output").short('f'),
        OptionSpec::string("format", "Format to print as (options: table,json)").default("table"),
    ],
    config: ConfigMode::None,
};

/// GUID of a deployed product, `None` when it is not deployed.
async fn deployed_guid(api: &Api, name: &str) -> Result<Option<String>, ApiError> {
    match api.deployed_product_guid(name).await {
        Ok(guid) => Ok(Some(guid)),
        Err(ApiError::ProductNotStaged(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

pub async fn credential_references(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let presenter = Presenter::from_options(&ctx.console, options)?;
    let api = ctx.api()?;
    let name = options.string("product-name");

    let mut references = if name == DIRECTOR_PRODUCT {
        api.list_director_credentials()
            .await
            .context("failed to list credential references")?
    } else {
        let guid = deployed_guid(&api, &name)
            .await
            .context("failed to list credential references")?
            .ok_or_else(|| anyhow!("failed to list credential references: {name} is not deployed"))?;
        api.list_deployed_product_credentials(&guid)
            .await
            .context("failed to list credential references")?
    };

    if references.is_empty() {
        ctx.console.log("no credential references found");
        return Ok(());
    }
    references.sort();
    let rows = references.iter().map(|r| vec![r.clone()]).collect();
    presenter.rows(&["Credentials"], rows, &references)?;
    Ok(())
}

pub async fn credentials(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let presenter = Presenter::from_options(&ctx.console, options)?;
    let api = ctx.api()?;
    let name = options.string("product-name");
    let reference = options.string("credential-reference");

    let fetched: Result<Credential, ApiError> = if name == DIRECTOR_PRODUCT {
        api.director_credential(&reference).await
    } else {
        let guid = deployed_guid(&api, &name)
            .await
            .context("failed to fetch credential")?
            .ok_or_else(|| anyhow!("failed to fetch credential: {name:?} is not deployed"))?;
        api.deployed_product_credential(&guid, &reference).await
    };
    let credential =
        fetched.with_context(|| format!("failed to fetch credential for {reference:?}"))?;
    if credential.value.is_empty() {
        bail!("failed to fetch credential for {reference:?}");
    }

    if let Some(field) = options.str("credential-field") {
        let Some(value) = credential.value.get(field) else {
            bail!("credential field {field:?} not found");
        };
        ctx.console.println(value);
        return Ok(());
    }

    let headers: Vec<&str> = credential.value.keys().map(String::as_str).collect();
    let row = credential.value.values().cloned().collect();
    presenter.rows(&headers, vec![row], &credential.value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::Harness;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    async fn mount_get(harness: &Harness, route: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&harness.server)
            .await;
    }

    async fn mount_deployed(harness: &Harness) {
        mount_get(
            harness,
            "/api/v0/deployed/products",
            json!([{"installation_name": "cf-guid", "guid": "cf-guid", "type": "cf", "product_version": "2.10.1"}]),
        )
        .await;
    }

    #[tokio::test]
    async fn test_credential_field_is_printed_alone() {
        let harness = Harness::start().await;
        mount_deployed(&harness).await;
        mount_get(
            &harness,
            "/api/v0/deployed/products/cf-guid/credentials/.uaa.admin_credentials",
            json!({"credential": {"type": "simple_credentials", "value": {"identity": "admin", "password": "s3cret"}}}),
        )
        .await;

        harness
            .run(
                &CREDENTIALS,
                &["-p", "cf", "-c", ".uaa.admin_credentials", "-f", "password"],
            )
            .await
            .unwrap();
        assert_eq!(harness.stdout(), "s3cret\n");

        let err = harness
            .run(&CREDENTIALS, &["-p", "cf", "-c", ".uaa.admin_credentials", "-f", "bogus"])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "credential field \"bogus\" not found");
    }

    #[tokio::test]
    async fn test_credentials_table_and_missing_product() {
        let harness = Harness::start().await;
        mount_deployed(&harness).await;
        mount_get(
            &harness,
            "/api/v0/deployed/director/credentials/director_credentials",
            json!({"credential": {"type": "simple_credentials", "value": {"identity": "director", "password": "pw"}}}),
        )
        .await;

        harness
            .run(&CREDENTIALS, &["-p", "p-bosh", "-c", "director_credentials"])
            .await
            .unwrap();
        let out = harness.stdout();
        assert!(out.contains("identity"));
        assert!(out.contains("director"));

        let err = harness
            .run(&CREDENTIALS, &["-p", "redis", "-c", "x"])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "failed to fetch credential: \"redis\" is not deployed");
    }

    #[tokio::test]
    async fn test_credential_references_sorted_json() {
        let harness = Harness::start().await;
        mount_deployed(&harness).await;
        mount_get(
            &harness,
            "/api/v0/deployed/products/cf-guid/credentials",
            json!({"credentials": [".uaa.b", ".uaa.a"]}),
        )
        .await;

        harness
            .run(&CREDENTIAL_REFERENCES, &["-p", "cf", "--format", "json"])
            .await
            .unwrap();
        let listed: Vec<String> = serde_json::from_str(&harness.stdout()).unwrap();
        assert_eq!(listed, vec![".uaa.a", ".uaa.b"]);

        let err = harness
            .run(&CREDENTIAL_REFERENCES, &["-p", "redis"])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to list credential references: redis is not deployed"
        );
    }
}
