//! Command-line surface of the agent and the process entry point.

use std::path::PathBuf;
use std::sync::{Arc, Once};

use anyhow::Context as _;
use clap::Parser;
use sda_config::{init_tracing, AgentConfig, DebuggeeConfig};

use crate::runtime::Runtime;
use crate::session::SessionController;

const URL_SCHEME: &str = "serversocket://";

/// Squawk debug agent.
///
/// Listens for the debug proxy, then runs the main class in a debuggee
/// isolate under its control.
#[derive(Debug, Parser)]
#[command(name = "sda", version, about)]
pub struct AgentArgs {
    /// Listen address: `host:port`, `:port`, or
    /// `serversocket://[host]:port[;acceptTimeout=<ms>]`.
    #[arg(short = 'u', long = "url")]
    pub url: Option<String>,

    /// Log level (`none`, `info`, `verbose`, `debug`) or an `EnvFilter`
    /// directive string.
    #[arg(long)]
    pub log: Option<String>,

    /// Append logs to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Path to a TOML config file.
    ///
    /// If unset, `SDA_CONFIG` is used as a fallback.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Start the debuggee right away instead of waiting for a debugger.
    #[arg(long)]
    pub no_suspend: bool,

    #[arg(long)]
    pub accept_timeout_ms: Option<u64>,

    /// Application class path entries.
    #[arg(long = "cp", value_delimiter = ':')]
    pub class_path: Vec<PathBuf>,

    /// Main class of the debuggee.
    pub main_class: Option<String>,

    /// Arguments passed to the main class.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl AgentArgs {
    /// Parses the argument vector handed over by the embedding runtime.
    /// The first element is the program name.
    pub fn parse_agent_args<I, T>(argv: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::try_parse_from(argv)
    }

    fn config_path(&self) -> Option<PathBuf> {
        self.config
            .clone()
            .or_else(|| std::env::var_os("SDA_CONFIG").map(PathBuf::from))
    }

    /// Loads the file config (if any) and applies command-line overrides.
    pub fn into_config(self) -> anyhow::Result<AgentConfig> {
        let mut config = match self.config_path() {
            Some(path) => AgentConfig::load_from_path(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => AgentConfig::default(),
        };

        if let Some(url) = &self.url {
            let (address, accept_timeout_ms) = parse_listen_url(url)?;
            config.listen.address = address;
            if let Some(ms) = accept_timeout_ms {
                config.listen.accept_timeout_ms = ms;
            }
        }
        if let Some(ms) = self.accept_timeout_ms {
            config.listen.accept_timeout_ms = ms;
        }
        if let Some(level) = self.log {
            config.logging.level = level;
        }
        if let Some(file) = self.log_file {
            config.logging.file = Some(file);
        }
        if self.no_suspend {
            config.debuggee.suspend_on_start = false;
        }
        if !self.class_path.is_empty() {
            config.debuggee.class_path = self.class_path;
        }
        if let Some(main_class) = self.main_class {
            config.debuggee.main_class = Some(main_class);
            config.debuggee.args = self.args;
        }
        Ok(config)
    }
}

/// Splits a listen URL into a socket address and an optional accept timeout.
pub fn parse_listen_url(url: &str) -> anyhow::Result<(String, Option<u64>)> {
    let rest = url.strip_prefix(URL_SCHEME).unwrap_or(url);
    let mut parts = rest.split(';');
    let authority = parts.next().unwrap_or_default().trim();

    let (host, port) = authority
        .rsplit_once(':')
        .with_context(|| format!("listen url `{url}` has no port"))?;
    let port = port
        .parse::<u16>()
        .with_context(|| format!("invalid port in listen url `{url}`"))?;
    // No host means every interface.
    let host = if host.is_empty() { "0.0.0.0" } else { host };

    let mut accept_timeout_ms = None;
    for param in parts {
        match param.split_once('=') {
            Some(("acceptTimeout", value)) => {
                let ms = value
                    .parse::<u64>()
                    .with_context(|| format!("invalid acceptTimeout in listen url `{url}`"))?;
                accept_timeout_ms = Some(ms);
            }
            _ => anyhow::bail!("unsupported parameter `{param}` in listen url `{url}`"),
        }
    }
    Ok((format!("{host}:{port}"), accept_timeout_ms))
}

/// Last-resort panic reporting. The previous hook still runs.
fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let location = info.location().map(|loc| loc.to_string());
            let message = info
                .payload()
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| info.payload().downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "<non-string panic payload>".to_owned());
            tracing::error!(target: "sda.panic", location = ?location, "panic: {message}");
            previous(info);
        }));
    });
}

/// Creates the debuggee runtime from the configured main class, class path
/// and arguments, and wraps it in a session controller.
pub fn build_controller<F>(config: AgentConfig, create_runtime: F) -> anyhow::Result<SessionController>
where
    F: FnOnce(&DebuggeeConfig) -> anyhow::Result<Arc<dyn Runtime>>,
{
    let runtime = create_runtime(&config.debuggee).with_context(|| {
        format!(
            "failed to create debuggee for main class {}",
            config.debuggee.main_class.as_deref().unwrap_or("<none>")
        )
    })?;
    Ok(SessionController::new(runtime, config))
}

/// Configures logging, creates the debuggee with `create_runtime` and runs
/// debug sessions until it exits. Returns the debuggee's exit code.
pub async fn launch<F>(args: AgentArgs, create_runtime: F) -> anyhow::Result<i32>
where
    F: FnOnce(&DebuggeeConfig) -> anyhow::Result<Arc<dyn Runtime>>,
{
    let config = args.into_config()?;
    init_tracing(&config.logging);
    install_panic_hook();

    tracing::info!(
        target: "sda.session",
        address = %config.listen.address,
        suspend_on_start = config.debuggee.suspend_on_start,
        main_class = config.debuggee.main_class.as_deref().unwrap_or("<none>"),
        class_path_entries = config.debuggee.class_path.len(),
        "starting debug agent"
    );
    let controller = build_controller(config, create_runtime)?;
    let code = controller.run().await?;
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;

    #[test]
    fn parses_legacy_and_plain_urls() {
        assert_eq!(
            parse_listen_url("serversocket://:2800;acceptTimeout=2000").unwrap(),
            ("0.0.0.0:2800".to_owned(), Some(2000))
        );
        assert_eq!(
            parse_listen_url("localhost:9000").unwrap(),
            ("localhost:9000".to_owned(), None)
        );
        assert!(parse_listen_url("serversocket://:notaport").is_err());
        assert!(parse_listen_url(":2800;bogus=1").is_err());
    }

    #[test]
    fn command_line_overrides_defaults() {
        let args = AgentArgs::parse_agent_args([
            "sda",
            "--url",
            "serversocket://:2900;acceptTimeout=50",
            "--log",
            "verbose",
            "--no-suspend",
            "--cp",
            "a.jar:b.jar",
            "com.example.Main",
            "first",
            "second",
        ])
        .unwrap();
        let config = args.into_config().unwrap();

        assert_eq!(config.listen.address, "0.0.0.0:2900");
        assert_eq!(config.listen.accept_timeout_ms, 50);
        assert_eq!(config.logging.level, "verbose");
        assert!(!config.debuggee.suspend_on_start);
        assert_eq!(
            config.debuggee.class_path,
            vec![PathBuf::from("a.jar"), PathBuf::from("b.jar")]
        );
        assert_eq!(config.debuggee.main_class.as_deref(), Some("com.example.Main"));
        assert_eq!(config.debuggee.args, vec!["first", "second"]);
    }

    #[test]
    fn debuggee_settings_reach_the_runtime_factory() {
        let args = AgentArgs::parse_agent_args([
            "sda",
            "--cp",
            "app.jar",
            "com.example.Main",
            "first",
        ])
        .unwrap();
        let config = args.into_config().unwrap();

        let mut seen = None;
        let controller = build_controller(config, |debuggee| {
            seen = Some(debuggee.clone());
            Ok(Arc::new(FakeRuntime::new()) as Arc<dyn Runtime>)
        })
        .unwrap();
        assert_eq!(controller.state(), crate::SessionState::NotConnected);

        let debuggee = seen.unwrap();
        assert_eq!(debuggee.main_class.as_deref(), Some("com.example.Main"));
        assert_eq!(debuggee.class_path, vec![PathBuf::from("app.jar")]);
        assert_eq!(debuggee.args, vec!["first"]);
    }

    #[test]
    fn runtime_factory_failure_names_the_main_class() {
        let args = AgentArgs::parse_agent_args(["sda", "com.example.Missing"]).unwrap();
        let config = args.into_config().unwrap();
        let err = build_controller(config, |_| anyhow::bail!("class not found"))
            .err()
            .unwrap();
        let message = format!("{err:#}");
        assert!(message.contains("com.example.Missing"), "{message}");
        assert!(message.contains("class not found"), "{message}");
    }

    #[test]
    fn config_file_is_loaded_before_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sda.toml");
        std::fs::write(
            &path,
            "[listen]\naddress = \"127.0.0.1:4000\"\naccept_timeout_ms = 10\n",
        )
        .unwrap();

        let args = AgentArgs::parse_agent_args([
            "sda",
            "--config",
            path.to_str().unwrap(),
            "--accept-timeout-ms",
            "25",
        ])
        .unwrap();
        let config = args.into_config().unwrap();
        assert_eq!(config.listen.address, "127.0.0.1:4000");
        assert_eq!(config.listen.accept_timeout_ms, 25);
        assert!(config.debuggee.suspend_on_start);
    }
}
