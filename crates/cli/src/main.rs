// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::Parser;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sluice::command::{Command, HELP};
use sluice::config::{Config, EXIT_SESSION_EXPIRED};
use sluice::console::{pump_lines, LineRouter, TerminalAlerts};
use sluice_session::{
    ActivityKind, ApiRequest, AuthFacade, FileStorage, SessionState, Visibility,
};

const MAX_LOGIN_ATTEMPTS: usize = 3;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&config);

    match run(config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("fatal: {e:#}");
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    // stdout carries command output; logs go to stderr.
    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

async fn run(config: Config) -> anyhow::Result<i32> {
    let shutdown = CancellationToken::new();
    let redirected = CancellationToken::new();

    // Stdin feeds both prompts and commands.
    let (line_tx, mut lines) = mpsc::channel(64);
    let router = Arc::new(LineRouter::new(line_tx));
    {
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            if let Err(e) = pump_lines(stdin, router).await {
                warn!("stdin closed: {e}");
            }
        });
    }

    let state_path = config.state_path();
    info!("session state at {}", state_path.display());
    let facade = AuthFacade::builder(config.session.clone())
        .storage(Arc::new(FileStorage::open(state_path)))
        .build(Arc::new(TerminalAlerts::new(Arc::clone(&router))))?;

    let _subscription = {
        let redirected = redirected.clone();
        facade.subscribe(move |t| {
            info!(prev = %t.prev, next = %t.next, seq = t.seq, cause = ?t.cause, "session transition");
            if t.is_redirect() {
                redirected.cancel();
            }
        })
    };

    // Spawn signal handler
    {
        let sd = shutdown.clone();
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();

            tokio::select! {
                _ = async {
                    if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGTERM");
                    sd.cancel();
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("received SIGINT");
                    sd.cancel();
                }
            }
        });
    }

    if facade.init().await == SessionState::LoggedOut {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(0),
            signed_in = sign_in(&facade, &config, &router) => {
                if !signed_in? {
                    return Ok(1);
                }
            }
        }
    }
    if let Some(user) = facade.current_user() {
        eprintln!("signed in as {}", user.username.as_deref().unwrap_or("(unknown)"));
    }
    eprintln!("type `help` for commands");

    let code = loop {
        tokio::select! {
            _ = redirected.cancelled() => {
                eprintln!("session expired; sign in again");
                break EXIT_SESSION_EXPIRED;
            }
            _ = shutdown.cancelled() => break 0,
            line = lines.recv() => {
                let Some(line) = line else {
                    info!("input ended");
                    break 0;
                };
                facade.record_activity(ActivityKind::KeyDown);
                let cmd = match Command::parse(&line) {
                    Ok(cmd) => cmd,
                    Err(e) => {
                        eprintln!("{e}");
                        continue;
                    }
                };
                if let Some(code) = execute(&facade, cmd).await {
                    break code;
                }
            }
        }
    };

    // A pending prompt may still hold the redirect; give it precedence.
    let code = if redirected.is_cancelled() { EXIT_SESSION_EXPIRED } else { code };
    facade.dispose();
    Ok(code)
}

/// Sign in from flags or terminal prompts. False when every attempt failed.
async fn sign_in(facade: &AuthFacade, config: &Config, router: &LineRouter) -> anyhow::Result<bool> {
    let interactive = config.username.is_none() || config.password.is_none();
    let attempts = if interactive { MAX_LOGIN_ATTEMPTS } else { 1 };

    for _ in 0..attempts {
        let username = match config.username {
            Some(ref name) => name.clone(),
            None => match router.ask("username: ").await {
                Some(name) => name,
                None => return Ok(false),
            },
        };
        let password = match config.password {
            Some(ref pass) => pass.clone(),
            None => match router.ask("password: ").await {
                Some(pass) => pass,
                None => return Ok(false),
            },
        };
        match facade.login(&username, &password).await {
            Ok(_) => return Ok(true),
            Err(e) => {
                warn!(err = %e, "login failed");
                eprintln!("login failed: {e}");
            }
        }
    }
    Ok(false)
}

/// Run one console command. `Some(code)` ends the console.
async fn execute(facade: &AuthFacade, cmd: Command) -> Option<i32> {
    match cmd {
        Command::Nothing => {}
        Command::Help => println!("{HELP}"),
        Command::Get { path } => call(facade, ApiRequest::get(path)).await,
        Command::Post { path, body } => call(facade, ApiRequest::post(path).json(body)).await,
        Command::Hide => facade.set_visibility(Visibility::Hidden).await,
        Command::Show => facade.set_visibility(Visibility::Visible).await,
        Command::WhoAmI => {
            let user = facade.current_user();
            println!(
                "user: {}",
                user.as_ref().and_then(|u| u.username.as_deref()).unwrap_or("(none)")
            );
            println!("state: {}", facade.state());
            if let Some(d) = facade.deadlines() {
                println!("warning at: {} ms", d.warning_at);
                println!("expires at: {} ms", d.expire_at);
            }
        }
        Command::Logout => {
            facade.logout().await;
            eprintln!("signed out");
            return Some(0);
        }
        Command::Quit => return Some(0),
    }
    None
}

async fn call(facade: &AuthFacade, req: ApiRequest) {
    let resp = match facade.api().send(req).await {
        Ok(resp) => resp,
        Err(e) => {
            eprintln!("request failed: {e}");
            return;
        }
    };
    let status = resp.status();
    let body = match resp.text().await {
        Ok(body) => body,
        Err(e) => {
            eprintln!("{status}: unreadable body: {e}");
            return;
        }
    };
    println!("{status}");
    match serde_json::from_str::<Value>(&body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json).unwrap_or(body)),
        Err(_) if body.is_empty() => {}
        Err(_) => println!("{body}"),
    }
}
