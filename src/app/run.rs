use crate::cli::app_config::Cli;
use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http_body_util::Full;
use hyper::{Request, StatusCode};
use rtimer::http::{ClientOptions, HttpClient};
use rtimer::{TimingsReport, TransportError};
use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunSummary<'a> {
    run: usize,
    url: &'a str,
    status: Option<u16>,
    error: Option<String>,
    timings: TimingsReport,
}

pub async fn main_with_error() -> Result<(), anyhow::Error> {
    let cli: Cli = Cli::parse();
    init_logging(cli.verbosity)?;

    do_request(cli).await
}

fn init_logging(verbosity: u8) -> Result<(), anyhow::Error> {
    let log_level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy()
        .add_directive("hyper_util=off".parse()?);
    let subscriber = tracing_subscriber::fmt()
        .without_time()
        .with_level(false)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}

fn client_options(cli: &Cli) -> Result<ClientOptions, anyhow::Error> {
    let timeout = if cli.max_time > 0.0 {
        Some(
            Duration::try_from_secs_f64(cli.max_time)
                .with_context(|| format!("invalid max time: {}", cli.max_time))?,
        )
    } else {
        None
    };
    let mut options = ClientOptions {
        timeout,
        insecure: cli.skip_certificate_validate,
        ca_file: cli.certificate_path_option.clone(),
        ..ClientOptions::default()
    };
    if let Some(agent) = cli.user_agent_option.as_ref() {
        options.user_agent = agent.clone();
    }
    Ok(options)
}

fn build_request(cli: &Cli) -> Result<Request<Full<Bytes>>, anyhow::Error> {
    let mut method = String::from("GET");
    let mut request_builder = Request::builder();
    if cli.body_option.is_some() {
        method = String::from("POST");
        request_builder = request_builder.header(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
    }
    if let Some(method_userdefined) = cli.method_option.as_ref() {
        method = method_userdefined.clone();
    }

    for x in &cli.headers {
        let split: Vec<&str> = x.splitn(2, ':').collect();
        ensure!(split.len() == 2, "header error: '{}'", x);
        request_builder = request_builder.header(
            HeaderName::from_str(split[0].trim())?,
            HeaderValue::from_str(split[1].trim_start())?,
        );
    }

    let body = cli
        .body_option
        .as_ref()
        .map_or(Bytes::new(), |b| Bytes::from(b.clone()));
    let request = request_builder
        .method(method.as_str())
        .uri(cli.url.as_str())
        .body(Full::new(body))
        .context("Failed to build the request")?;
    Ok(request)
}

async fn do_request(cli: Cli) -> Result<(), anyhow::Error> {
    let client = HttpClient::new(client_options(&cli)?)?;

    for run in 1..=cli.count.max(1) {
        let exchange = client.request(build_request(&cli)?)?;
        let timings = rtimer::timer(exchange.request());

        let outcome: Result<StatusCode, TransportError> = async {
            let response = exchange.send().await?;
            let status = response.status();
            response.bytes().await?;
            Ok::<_, TransportError>(status)
        }
        .await;
        debug!("run {} finished: {:?}", run, outcome);

        if cli.json {
            let summary = RunSummary {
                run,
                url: &cli.url,
                status: outcome.as_ref().ok().map(StatusCode::as_u16),
                error: outcome.as_ref().err().map(ToString::to_string),
                timings: timings.report(),
            };
            println!("{}", serde_json::to_string(&summary)?);
        } else {
            if cli.count > 1 {
                println!("Run {}/{}", run, cli.count);
            }
            match outcome.as_ref() {
                Ok(status) => println!("Status: {}", status),
                Err(e) => println!("Error: {}", e),
            }
            println!("{}", timings);
        }

        outcome.with_context(|| format!("request to {} failed", cli.url))?;
    }
    Ok(())
}
