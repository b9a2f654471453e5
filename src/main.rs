//! Paywall Net CLI
//!
//! Issues one request through the full client stack and prints the JSON reply.
//!
//! ```text
//! paywall_net [METHOD] PATH [JSON_BODY]
//! ```
//!
//! Credentials are seeded from `ACCESS_TOKEN` / `REFRESH_TOKEN`; everything
//! else comes from the same environment variables as `Config::from_env`.

use std::env;
use std::sync::Arc;

use anyhow::{bail, Context};
use reqwest::Method;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paywall_net::auth::SessionEvent;
use paywall_net::{
    spawn_cleanup_task, Config, Credentials, HttpClient, MemoryTokenStore, RequestOptions,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to info for this crate, override with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "paywall_net=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let (method, path, body) = parse_args(env::args().skip(1).collect())?;

    let config = Config::from_env();
    info!(
        base_url = %config.api_base_url,
        max_concurrent = config.max_concurrent,
        timeout_ms = config.request_timeout_ms,
        cache_max_entries = config.cache_max_entries,
        "configuration loaded"
    );

    let store = Arc::new(MemoryTokenStore::new());
    let authenticated = match env::var("ACCESS_TOKEN") {
        Ok(access) => {
            let mut credentials = Credentials::new(access);
            credentials.refresh_token = env::var("REFRESH_TOKEN").ok();
            credentials.save(store.as_ref());
            true
        }
        Err(_) => false,
    };

    let client = HttpClient::from_config(&config, store)?;
    let _session = client.auth().map(|auth| {
        auth.on_session_expired(|event| {
            if let SessionEvent::Expired { reason } = event {
                warn!(%reason, "session expired, log in again");
            }
        })
    });
    let cleanup_handle = spawn_cleanup_task(client.cache(), config.cleanup_interval);

    let mut options = RequestOptions::new();
    if !authenticated {
        options = options.anonymous();
    }
    let result = client.request(method, &path, body, options).await;
    cleanup_handle.abort();

    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(err) => {
            eprintln!("{}", serde_json::to_string_pretty(&err)?);
            bail!("request to {} failed: {}", path, err)
        }
    }
}

fn parse_args(args: Vec<String>) -> anyhow::Result<(Method, String, Option<Value>)> {
    let (method, rest) = match args.as_slice() {
        [] => bail!("usage: paywall_net [METHOD] PATH [JSON_BODY]"),
        [first, ..] if first.starts_with('/') => (Method::GET, args.iter().collect::<Vec<_>>()),
        [method, rest @ ..] => (
            method
                .to_uppercase()
                .parse::<Method>()
                .with_context(|| format!("invalid method {}", method))?,
            rest.iter().collect(),
        ),
    };

    let path = rest.first().map(|p| p.to_string()).context("missing request path")?;
    let body = rest
        .get(1)
        .map(|raw| serde_json::from_str(raw).context("request body must be JSON"))
        .transpose()?;
    Ok((method, path, body))
}
