use std::cell::Cell;
use std::rc::Rc;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored_json::{ColorMode, ColoredFormatter, Output, PrettyFormatter};
use log::{info, LevelFilter};

use xmlrpc::{Call, Client, Continuation, Error, Interest, Outcome, Server, Source, Value};

mod json;

#[derive(Parser)]
#[command(name = "xmlrpc")]
#[command(version)]
#[command(about = "Call XML-RPC methods and run a demo server", long_about = None)]
struct Cli {
    /// One of off, error, warn, info, debug, trace
    #[arg(long, default_value_t = format!("warn"))]
    log_level: String,
    /// Colorize JSON output
    #[arg(long, value_enum, default_value_t = Color::Auto)]
    color: Color,
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Color {
    On,
    Off,
    Auto,
}

#[derive(Subcommand)]
enum Command {
    /// Call a method and print its result as JSON
    Call {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        password: Option<String>,
        /// Seconds to wait for the answer
        #[arg(long, default_value_t = 30)]
        timeout: u64,
        /// e.g. http://localhost:8000/RPC2
        url: String,
        method: String,
        /// Parameters as JSON
        params: Vec<String>,
    },
    /// Serve the echo, add, fault and postpone methods
    Serve {
        #[arg(long, default_value_t = 8000)]
        port: u16,
        /// Seconds to serve; forever if not given
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Print the XML-RPC encoding of a JSON value
    Encode { value: String },
}

/// Split `http://host[:port][/path]` into its parts.
fn parse_url(url: &str) -> Result<(String, u16, String)> {
    let rest = url
        .strip_prefix("http://")
        .ok_or_else(|| anyhow!("unsupported URL '{}', expected http://", url))?;
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/RPC2"),
    };
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (
            host,
            port.parse::<u16>()
                .with_context(|| format!("invalid port in '{}'", url))?,
        ),
        None => (authority, 80),
    };
    if host.is_empty() {
        bail!("missing host in '{}'", url);
    }
    Ok((host.to_string(), port, path.to_string()))
}

fn print_json(value: &Value, color_mode: ColorMode) -> Result<()> {
    let formatter = ColoredFormatter::new(PrettyFormatter::new());
    println!(
        "{}",
        formatter.to_colored_json(&json::from_value(value), color_mode)?
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn xmlrpc_call(
    url: &str,
    method: &str,
    params: &[String],
    user: Option<&str>,
    password: Option<&str>,
    timeout: u64,
    color_mode: ColorMode,
) -> Result<()> {
    let (host, port, path) = parse_url(url)?;
    let params = params
        .iter()
        .map(|param| {
            let parsed = serde_json::from_str(param)
                .with_context(|| format!("Failed to parse parameter '{}'", param))?;
            json::to_value(&parsed)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut client = Client::new(&host, port, &path);
    let reply = client
        .execute(
            method,
            &params,
            Some(Duration::from_secs(timeout)),
            user,
            password,
        )
        .with_context(|| format!("Failed to call method '{}'", method))?;
    print_json(&reply, color_mode)
}

/// The fault asked for by the first parameter, code 1 if there is none.
fn requested_fault(params: &[Value]) -> Error {
    let code = params.first().and_then(Value::as_int).unwrap_or(1);
    match i32::try_from(code) {
        Ok(code) => Error::fault(code, "requested fault"),
        Err(_) => Error::fault(2, format!("fault code {} out of range", code)),
    }
}

fn serve(port: u16, timeout: Option<u64>) -> Result<()> {
    let mut server = Server::bind_and_listen(port, xmlrpc::Config::default().listen_queue)?;
    info!("serving on {}", server.local_addr()?);

    server.add_method("echo", |_call: &mut Call<'_>, params: Vec<Value>| {
        Ok(Value::Array(params))
    });
    server.add_method("add", |_call: &mut Call<'_>, params: Vec<Value>| {
        let mut sum = 0i64;
        for param in &params {
            sum += param
                .as_int()
                .ok_or_else(|| Error::fault(1, format!("cannot add a {}", param.type_name())))?;
        }
        Ok(Value::Int(sum))
    });
    server.add_method("fault", |_call: &mut Call<'_>, params: Vec<Value>| {
        Err(requested_fault(&params))
    });

    // Answers with the parameters once the loop has gone round once more.
    let postponed = Rc::new(Cell::new(0u64));
    let count = postponed.clone();
    server.add_method("postpone", move |call: &mut Call<'_>, params: Vec<Value>| {
        count.set(count.get() + 1);
        let id = call.connection();
        let handle = call.server().clone();
        let answer = Value::Array(params);
        let mut source = Source::new(-1);
        source.arm(
            Interest::IMMEDIATE,
            Continuation::native(move |dispatcher, _source, _occurred| {
                handle.queue_response(dispatcher, id, &answer)
            }),
        );
        call.dispatcher().add_source(source);
        Err(Error::Postpone)
    });

    let outcome = server.work(timeout.map(Duration::from_secs))?;
    info!("server stopped ({:?}), {} postponed answers sent", outcome, postponed.get());
    if outcome == Outcome::AllDone {
        bail!("listening socket went away");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = LevelFilter::from_str(&cli.log_level)
        .with_context(|| format!("invalid log level '{}'", cli.log_level))?;
    env_logger::Builder::new().filter(None, log_level).init();
    let color_mode = match cli.color {
        Color::On => ColorMode::On,
        Color::Off => ColorMode::Off,
        Color::Auto => ColorMode::Auto(Output::StdOut),
    };

    match cli.command {
        Command::Call {
            user,
            password,
            timeout,
            url,
            method,
            params,
        } => xmlrpc_call(
            &url,
            &method,
            &params,
            user.as_deref(),
            password.as_deref(),
            timeout,
            color_mode,
        ),
        Command::Serve { port, timeout } => serve(port, timeout),
        Command::Encode { value } => {
            let parsed = serde_json::from_str(&value)
                .with_context(|| format!("Failed to parse '{}'", value))?;
            let encoded = xmlrpc::encode(&json::to_value(&parsed)?)?;
            println!("{}", String::from_utf8_lossy(&encoded));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url() {
        assert_eq!(
            parse_url("http://localhost:8000/RPC2").unwrap(),
            ("localhost".to_string(), 8000, "/RPC2".to_string())
        );
        assert_eq!(
            parse_url("http://example.com").unwrap(),
            ("example.com".to_string(), 80, "/RPC2".to_string())
        );
        assert!(parse_url("https://example.com/").is_err());
        assert!(parse_url("http://:80/").is_err());
        assert!(parse_url("http://host:port/").is_err());
    }

    #[test]
    fn test_requested_fault() {
        assert_eq!(requested_fault(&[]), Error::fault(1, "requested fault"));
        assert_eq!(
            requested_fault(&[Value::Int(-40)]),
            Error::fault(-40, "requested fault")
        );
        assert_eq!(
            requested_fault(&[Value::Int(i64::from(i32::MAX) + 1)]),
            Error::fault(2, "fault code 2147483648 out of range")
        );
        assert_eq!(
            requested_fault(&[Value::Int(i64::MIN)]),
            Error::fault(2, format!("fault code {} out of range", i64::MIN))
        );
    }
}
