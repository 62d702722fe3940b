//! Raw authenticated API requests.

use anyhow::{bail, Context as _};
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;

use super::Context;
use crate::network::{Body, Request};
use crate::options::{Bound, CommandSpec, ConfigMode, OptionSpec};

pub const CURL: CommandSpec = CommandSpec {
    name: "curl",
    summary: "issues an authenticated API request",
    description: "This command issues an authenticated API request as defined in the arguments",
    options: &[
        OptionSpec::string("path", "path to api endpoint").short('p').required(),
        OptionSpec::string("request", "http verb (defaults to GET, POST when 'data' specified").short('x'),
        OptionSpec::string("data", "api request payload (prefix with @ to read file contents)").short('d'),
        OptionSpec::flag("silent", "only write response headers to stderr if response status is 4XX or 5XX").short('s'),
        OptionSpec::repeated("header", "used to specify custom headers with your command (default: \"Content-Type: application/json\")").short('H'),
    ],
    config: ConfigMode::None,
};

const DEFAULT_HEADER: &str = "Content-Type: application/json";

/// Split `Name: value` into its parts.
fn parse_header(raw: &str) -> anyhow::Result<(&str, &str)> {
    match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value.trim())),
        _ => bail!("invalid header {raw:?}: expected \"Name: value\""),
    }
}

fn payload(data: &str) -> anyhow::Result<Bytes> {
    match data.strip_prefix('@') {
        Some(path) => {
            let contents = std::fs::read(path).with_context(|| format!("couldn't open {path}"))?;
            Ok(Bytes::from(contents))
        }
        None => Ok(Bytes::from(data.to_string())),
    }
}

fn build_request(options: &Bound) -> anyhow::Result<Request> {
    let data = options.str("data");
    let method = match options.str("request") {
        Some(verb) => Method::from_bytes(verb.to_uppercase().as_bytes())
            .with_context(|| format!("invalid request method {verb:?}"))?,
        None if data.is_some() => Method::POST,
        None => Method::GET,
    };

    let mut request = Request::new(method, options.string("path")).without_retry();
    let headers = options.list("header");
    let headers: Vec<&str> = if headers.is_empty() {
        vec![DEFAULT_HEADER]
    } else {
        headers.iter().map(String::as_str).collect()
    };
    for raw in headers {
        let (name, value) = parse_header(raw)?;
        request = request.header(name, value)?;
    }
    if let Some(data) = data {
        request = request.body(Body::Bytes(payload(data)?));
    }
    Ok(request)
}

/// Indent JSON bodies; anything else passes through untouched.
fn pretty_body(content_type: Option<&str>, body: &[u8]) -> String {
    let is_json = content_type.is_some_and(|t| t.starts_with("application/json"));
    if is_json {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
            if let Ok(pretty) = serde_json::to_string_pretty(&value) {
                return pretty;
            }
        }
    }
    String::from_utf8_lossy(body).into_owned()
}

pub async fn curl(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let request = build_request(options)?;
    let response = ctx
        .api()?
        .send(request)
        .await
        .context("failed to make api request")?;

    let status = response.status();
    if !options.flag("silent") || status.as_u16() >= 400 {
        ctx.console.log(format!(
            "Status: {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default()
        ));
        let mut headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    canonical_name(name.as_str()),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        headers.sort();
        for (name, value) in headers {
            ctx.console.log(format!("{name}: {value}"));
        }
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    let body = response
        .bytes()
        .await
        .context("failed to read api response body")?;
    ctx.console
        .println(pretty_body(content_type.as_deref(), &body));

    if status.as_u16() >= 400 {
        bail!("server responded with a {} error", status.as_u16());
    }
    Ok(())
}

/// `content-type` → `Content-Type`.
fn canonical_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::Harness;
    use serde_json::json;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, ResponseTemplate};

    #[test]
    fn test_parse_header() {
        assert_eq!(parse_header("Accept: text/plain").unwrap(), ("Accept", "text/plain"));
        assert_eq!(parse_header("X-A:b:c").unwrap(), ("X-A", "b:c"));
        assert!(parse_header("nonsense").is_err());
        assert_eq!(canonical_name("content-type"), "Content-Type");
    }

    #[tokio::test]
    async fn test_curl_pretty_prints_json() {
        let harness = Harness::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v0/staged/products"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"guid": "cf-guid"}])))
            .mount(&harness.server)
            .await;

        harness
            .run(&CURL, &["--path", "/api/v0/staged/products"])
            .await
            .unwrap();
        assert_eq!(harness.stdout(), "[\n  {\n    \"guid\": \"cf-guid\"\n  }\n]\n");
        assert!(harness.stderr().starts_with("Status: 200 OK"));
        assert!(harness.stderr().contains("Content-Type: application/json"));
    }

    #[tokio::test]
    async fn test_curl_data_defaults_to_post_and_reads_files() {
        let harness = Harness::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/things"))
            .and(body_string("{\"a\":1}"))
            .respond_with(ResponseTemplate::new(201).set_body_string("created"))
            .expect(2)
            .mount(&harness.server)
            .await;

        harness
            .run(&CURL, &["-p", "/api/v0/things", "-d", "{\"a\":1}", "-s"])
            .await
            .unwrap();
        assert_eq!(harness.stderr(), "");

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("body.json");
        std::fs::write(&file, "{\"a\":1}").unwrap();
        let data = format!("@{}", file.display());
        harness
            .run(&CURL, &["-p", "/api/v0/things", "-d", &data, "-x", "post"])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_curl_error_status_fails_even_when_silent() {
        let harness = Harness::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v0/things/1"))
            .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
            .mount(&harness.server)
            .await;

        let err = harness
            .run(&CURL, &["-p", "/api/v0/things/1", "-x", "DELETE", "--silent"])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "server responded with a 404 error");
        assert!(harness.stderr().contains("Status: 404 Not Found"));
        assert!(harness.stdout().contains("nope"));
    }
}
