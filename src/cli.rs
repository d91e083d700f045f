use crate::{
    actions,
    catalog::Catalog,
    config::{self, AppConfig},
    feed::FeedClient,
    host::{FsHost, HostApi},
    select::Selection,
    status::{Panel, Reconciler, Tab},
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct GlobalOptions {
    format: OutputFormat,
    host_root: Option<PathBuf>,
    feed_base: Option<String>,
    docs_base: Option<String>,
}

enum CliCommand {
    Status,
    Show(String),
    Activate(String),
    Deactivate(String),
    Install { ids: Vec<String> },
    Plan { ids: Vec<String> },
    Remove { id: String, confirmed: bool },
    Help,
    Version,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (global, tokens) = parse_global_options(&args)?;
    let command = parse_command(&tokens)?;

    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("moddeck v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let deck = Deck::initialize(&global)?;
            deck.run_command(command, global.format)
        }
    }
}

fn parse_global_options(args: &[String]) -> Result<(GlobalOptions, Vec<String>)> {
    let mut format = OutputFormat::Text;
    let mut host_root = None;
    let mut feed_base = None;
    let mut docs_base = None;
    let mut tokens = Vec::new();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            format = OutputFormat::parse(value)
                .with_context(|| format!("Unknown format: {value} (use 'text' or 'json')"))?;
            continue;
        }
        if arg == "--format" {
            let value = iter.next().context("--format requires a value")?;
            format = OutputFormat::parse(value)
                .with_context(|| format!("Unknown format: {value} (use 'text' or 'json')"))?;
            continue;
        }
        if let Some(value) = arg.strip_prefix("--host-root=") {
            host_root = Some(PathBuf::from(value));
            continue;
        }
        if arg == "--host-root" {
            if let Some(value) = iter.next() {
                host_root = Some(PathBuf::from(value));
            }
            continue;
        }
        if let Some(value) = arg.strip_prefix("--feed-base=") {
            feed_base = Some(value.to_string());
            continue;
        }
        if arg == "--feed-base" {
            if let Some(value) = iter.next() {
                feed_base = Some(value.to_string());
            }
            continue;
        }
        if let Some(value) = arg.strip_prefix("--docs-base=") {
            docs_base = Some(value.to_string());
            continue;
        }
        if arg == "--docs-base" {
            if let Some(value) = iter.next() {
                docs_base = Some(value.to_string());
            }
            continue;
        }
        tokens.push(arg.to_string());
    }

    Ok((
        GlobalOptions {
            format,
            host_root,
            feed_base,
            docs_base,
        },
        tokens,
    ))
}

fn parse_command(tokens: &[String]) -> Result<CliCommand> {
    let Some(head) = tokens.first() else {
        return Ok(CliCommand::Status);
    };
    match head.as_str() {
        "--help" | "-h" | "help" => Ok(CliCommand::Help),
        "--version" | "-V" | "version" => Ok(CliCommand::Version),
        "status" => Ok(CliCommand::Status),
        "show" => {
            let id = tokens
                .get(1)
                .context("show requires a module id")?
                .to_string();
            Ok(CliCommand::Show(id))
        }
        "activate" => {
            let id = tokens
                .get(1)
                .context("activate requires a module id")?
                .to_string();
            Ok(CliCommand::Activate(id))
        }
        "deactivate" => {
            let id = tokens
                .get(1)
                .context("deactivate requires a module id")?
                .to_string();
            Ok(CliCommand::Deactivate(id))
        }
        "install" | "upgrade" => {
            let ids: Vec<String> = tokens[1..].to_vec();
            if ids.is_empty() {
                bail!("{head} requires one or more module ids");
            }
            Ok(CliCommand::Install { ids })
        }
        "plan" => {
            let ids: Vec<String> = tokens[1..].to_vec();
            if ids.is_empty() {
                bail!("plan requires one or more module ids");
            }
            Ok(CliCommand::Plan { ids })
        }
        "remove" => {
            let mut id = None;
            let mut confirmed = false;
            for token in &tokens[1..] {
                match token.as_str() {
                    "--yes" | "-y" => confirmed = true,
                    value if !value.starts_with('-') => id = Some(value.to_string()),
                    other => bail!("Unknown remove option: {other}"),
                }
            }
            let id = id.context("remove requires a module id")?;
            Ok(CliCommand::Remove { id, confirmed })
        }
        other => bail!("Unknown command: {other} (try 'moddeck help')"),
    }
}

/// Accept either the catalog id or the on-disk slug; unknown queries pass
/// through unchanged so the panel lookup reports them.
fn resolve_module_id(catalog: &Catalog, query: &str) -> String {
    catalog
        .get(query)
        .or_else(|| catalog.get_by_slug(query))
        .map(|entry| entry.id.clone())
        .unwrap_or_else(|| query.to_string())
}

struct Deck {
    config: AppConfig,
    catalog: Catalog,
    host: FsHost,
    feed: FeedClient,
}

impl Deck {
    fn initialize(global: &GlobalOptions) -> Result<Self> {
        let mut config = AppConfig::load_or_create()?;
        if let Some(root) = &global.host_root {
            config.host_root = root.clone();
        }
        if let Some(base) = &global.feed_base {
            config.feed_base = base.clone();
        }
        if let Some(base) = &global.docs_base {
            config.docs_base = base.clone();
        }
        if config.host_root.as_os_str().is_empty() {
            bail!("host root not configured (set it in config.json or pass --host-root)");
        }

        let data_dir = config.data_dir()?;
        std::fs::create_dir_all(&data_dir).context("create app data dir")?;
        let catalog = Catalog::load_or_create(&data_dir)?;
        let host = FsHost::new(config.host_root.clone());
        let feed = FeedClient::new(&config.feed_base);
        Ok(Self {
            config,
            catalog,
            host,
            feed,
        })
    }

    fn reconcile(&self) -> Result<Panel> {
        let reconciler = Reconciler::new(
            &self.catalog,
            &self.host,
            &self.feed,
            &self.config.feed_base,
            &self.config.docs_base,
        );
        reconciler.reconcile()
    }

    fn run_command(&self, command: CliCommand, format: OutputFormat) -> Result<()> {
        match command {
            CliCommand::Status => {
                let panel = self.reconcile()?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&panel)?);
                    }
                    OutputFormat::Text => print_panel(&panel),
                }
                Ok(())
            }
            CliCommand::Show(query) => {
                let panel = self.reconcile()?;
                let id = resolve_module_id(&self.catalog, &query);
                let status = panel
                    .find(&id)
                    .with_context(|| format!("module {query} not in panel (unknown or feed miss)"))?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(status)?);
                    }
                    OutputFormat::Text => print_module(status),
                }
                Ok(())
            }
            CliCommand::Activate(id) => {
                let outcome = actions::activate(&self.catalog, &self.host, &id)?;
                self.print_outcome(&outcome, format, || {
                    format!("Activated {}", outcome.module)
                })
            }
            CliCommand::Deactivate(id) => {
                let outcome = actions::deactivate(&self.catalog, &self.host, &id)?;
                self.print_outcome(&outcome, format, || {
                    format!("Deactivated {}", outcome.module)
                })
            }
            CliCommand::Install { ids } => self.run_install(&ids, format),
            CliCommand::Plan { ids } => self.run_plan(&ids, format),
            CliCommand::Remove { id, confirmed } => self.run_remove(&id, confirmed, format),
            CliCommand::Help | CliCommand::Version => unreachable!("handled in run"),
        }
    }

    fn run_install(&self, ids: &[String], format: OutputFormat) -> Result<()> {
        let order = self.selection_plan(ids)?;
        let cache_dir = config::download_cache_dir()?;
        let mut outcomes = Vec::new();
        for id in &order {
            let outcome = actions::install(
                &self.catalog,
                self.host.root(),
                &self.feed,
                &cache_dir,
                id,
            )?;
            outcomes.push(outcome);
        }
        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&outcomes)?);
            }
            OutputFormat::Text => {
                for outcome in &outcomes {
                    println!(
                        "Installed {} v{} ({} files)",
                        outcome.module, outcome.version, outcome.extracted_files
                    );
                }
            }
        }
        Ok(())
    }

    fn run_plan(&self, ids: &[String], format: OutputFormat) -> Result<()> {
        let order = self.selection_plan(ids)?;
        let requested: Vec<&String> = ids.iter().collect();

        #[derive(Serialize)]
        struct PlanRow {
            id: String,
            forced: bool,
        }
        let rows: Vec<PlanRow> = order
            .iter()
            .map(|id| PlanRow {
                id: id.clone(),
                forced: !requested.iter().any(|req| *req == id),
            })
            .collect();

        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            OutputFormat::Text => {
                for row in &rows {
                    if row.forced {
                        println!("{} (required dependency)", row.id);
                    } else {
                        println!("{}", row.id);
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolve a bulk request into install order, pulling in direct
    /// requirements that are not installed yet.
    fn selection_plan(&self, ids: &[String]) -> Result<Vec<String>> {
        let installed: Vec<String> = self
            .catalog
            .entries
            .iter()
            .filter_map(|entry| {
                match self.host.is_installed(entry.kind, &entry.slug) {
                    Ok(true) => Some(entry.id.clone()),
                    _ => None,
                }
            })
            .collect();
        let mut selection = Selection::new(&self.catalog, installed.clone());
        for id in ids {
            if installed.iter().any(|have| have == id) {
                // upgrades re-install in place, no selection bookkeeping
                continue;
            }
            selection.select(id)?;
        }
        let mut order = selection.plan();
        for id in ids {
            if installed.iter().any(|have| have == id) && !order.iter().any(|o| o == id) {
                order.push(id.clone());
            }
        }
        Ok(order)
    }

    fn run_remove(&self, id: &str, confirmed: bool, format: OutputFormat) -> Result<()> {
        if self.config.confirm_remove && !confirmed {
            bail!("remove deletes module files from the host; re-run with --yes to confirm");
        }
        let outcome = actions::remove(&self.catalog, &self.host, self.host.root(), id)?;
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
            OutputFormat::Text => {
                for (path, ok) in &outcome.removed {
                    let marker = if *ok { "removed" } else { "FAILED" };
                    println!("{marker}  {path}");
                }
                if outcome.failures > 0 {
                    println!(
                        "Removed {} with {} failed path(s)",
                        outcome.module, outcome.failures
                    );
                } else {
                    println!("Removed {}", outcome.module);
                }
            }
        }
        Ok(())
    }

    fn print_outcome<T: Serialize>(
        &self,
        outcome: &T,
        format: OutputFormat,
        text: impl Fn() -> String,
    ) -> Result<()> {
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(outcome)?),
            OutputFormat::Text => println!("{}", text()),
        }
        Ok(())
    }
}

fn print_panel(panel: &Panel) {
    println!("Host version: {}", panel.host_version);

    println!("\nInstalled");
    let installed = panel.tab(Tab::Installed);
    if installed.is_empty() {
        println!("  (none)");
    }
    for status in installed {
        let version = if status.update_available {
            format!(
                "v{} (update available: v{})",
                status.version_used, status.version_latest
            )
        } else {
            format!("v{}", status.version_used)
        };
        println!(
            "  {:<28} {:<10} {}",
            status.name,
            status.kind.label(),
            version
        );
    }

    println!("\nNot Installed/Activated");
    let pending = panel.tab(Tab::NotActiveOrInstalled);
    if pending.is_empty() {
        println!("  (none)");
    }
    for status in pending {
        let state = if status.installed {
            "not active"
        } else {
            "not installed"
        };
        println!(
            "  {:<28} {:<10} {}",
            status.name,
            status.kind.label(),
            state
        );
    }

    println!("\nDeprecated");
    let deprecated = panel.tab(Tab::Deprecated);
    if deprecated.is_empty() {
        println!("  (none)");
    }
    for status in deprecated {
        let case = status
            .deprecation
            .as_ref()
            .map(|notice| notice.case)
            .unwrap_or("default");
        let state = if status.active {
            "active"
        } else if status.installed {
            "not active"
        } else {
            "not installed"
        };
        println!(
            "  {:<28} {:<10} {state}, deprecated ({case})",
            status.name,
            status.kind.label()
        );
        if let Some(notice) = &status.deprecation {
            if let Some(text) = &notice.notice {
                println!("    {text}");
            }
            if let Some(replacement) = &notice.replacement {
                println!("    Replacement available: {replacement}");
            }
        }
    }

    if !panel.skipped.is_empty() {
        println!("\nSkipped (no usable release feed): {}", panel.skipped.join(", "));
    }
}

fn print_module(status: &crate::status::ModuleStatus) {
    println!("{} ({})", status.name, status.id);
    println!("  kind:      {}", status.kind.label());
    println!("  installed: {}", status.installed);
    println!("  active:    {}", status.active);
    println!("  version:   {} (latest {})", status.version_used, status.version_latest);
    if status.update_available {
        println!("  update:    available");
    }
    if let Some(notice) = &status.deprecation {
        println!("  deprecated: {}", notice.case);
        if let Some(text) = &notice.notice {
            println!("    {text}");
        }
    }
    if !status.missing_requires.is_empty() {
        println!("  missing requirements: {}", status.missing_requires.join(", "));
    }
    println!("  download:  {}", status.links.download);
    println!("  docs:      {}", status.links.documentation);
}

fn print_help() {
    println!("moddeck - module version and lifecycle panel");
    println!();
    println!("Usage: moddeck [command] [options]");
    println!();
    println!("Commands:");
    println!("  status                 Show all known modules by tab (default)");
    println!("  show <id>              Show one module in detail");
    println!("  activate <id>          Activate an installed module");
    println!("  deactivate <id>        Deactivate a module (widgets excluded)");
    println!("  install <id>...        Download and unpack modules (plus required deps)");
    println!("  upgrade <id>...        Alias of install; re-downloads the latest build");
    println!("  plan <id>...           Preview a bulk install with forced dependencies");
    println!("  remove <id> [--yes]    Delete a module's files from the host");
    println!("  help, version");
    println!();
    println!("Options:");
    println!("  --format <text|json>   Output format (default text)");
    println!("  --host-root <path>     Override the configured host root");
    println!("  --feed-base <url>      Override the release feed base URL");
    println!("  --docs-base <url>      Override the documentation base URL");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn parses_format_and_leaves_command_tokens() {
        let (global, tokens) =
            parse_global_options(&args(&["--format", "json", "show", "deck-ssl"])).unwrap();
        assert!(global.format == OutputFormat::Json);
        assert_eq!(tokens, args(&["show", "deck-ssl"]));
    }

    #[test]
    fn rejects_unknown_format_value() {
        let err = parse_global_options(&args(&["--format=yaml", "status"])).unwrap_err();
        assert!(err.to_string().contains("Unknown format: yaml"));
        let err = parse_global_options(&args(&["--format", "csv"])).unwrap_err();
        assert!(err.to_string().contains("Unknown format: csv"));
    }

    #[test]
    fn rejects_format_without_value() {
        let err = parse_global_options(&args(&["--format"])).unwrap_err();
        assert!(err.to_string().contains("requires a value"));
    }

    #[test]
    fn resolves_show_queries_by_id_or_slug() {
        let catalog = Catalog::builtin();
        assert_eq!(resolve_module_id(&catalog, "deck-ssl"), "deck-ssl");
        assert_eq!(resolve_module_id(&catalog, "deckssl"), "deck-ssl");
        assert_eq!(resolve_module_id(&catalog, "no-such-module"), "no-such-module");
    }

    #[test]
    fn remove_takes_id_and_confirmation_flag() {
        let command = parse_command(&args(&["remove", "deck-ssl", "--yes"])).unwrap();
        match command {
            CliCommand::Remove { id, confirmed } => {
                assert_eq!(id, "deck-ssl");
                assert!(confirmed);
            }
            _ => panic!("expected remove"),
        }
    }
}
