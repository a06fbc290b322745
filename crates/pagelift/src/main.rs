use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use pagelift_core::config::{load_config, render_default_config};
use pagelift_core::formatter::{ContentKind, content_type_by_name};
use pagelift_core::images::ImageResolver;
use pagelift_core::importer::Importer;
use pagelift_core::migrate::{pending_migration_count, run_migrations};
use pagelift_core::runtime::{
    MIGRATIONS_POLICY_MESSAGE, PathOverrides, ResolutionContext, init_layout, inspect_runtime,
    resolve_paths,
};
use pagelift_core::slugs::{find_available_slug, requested_content_slug};
use pagelift_core::store::{NewPage, Store};

#[derive(Debug, Parser)]
#[command(
    name = "pagelift",
    version,
    about = "One-off legacy CMS content migration: JSON exports into a local page store"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    Db(DbArgs),
    Page(PageArgs),
    Import(ImportArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
enum DbSubcommand {
    Migrate,
    Stats,
}

#[derive(Debug, Args)]
struct PageArgs {
    #[command(subcommand)]
    command: PageSubcommand,
}

#[derive(Debug, Subcommand)]
enum PageSubcommand {
    #[command(about = "Seed a page in the destination tree (a root if no --parent)")]
    Add(PageAddArgs),
    List,
}

#[derive(Debug, Args)]
struct PageAddArgs {
    #[arg(long)]
    title: String,
    #[arg(long, value_name = "PAGE_ID", help = "Attach under this existing page")]
    parent: Option<i64>,
    #[arg(long, help = "Slug; derived from the title when omitted")]
    slug: Option<String>,
    #[arg(long, default_value = "default", help = "Site key (roots only)")]
    site: String,
    #[arg(long, default_value = "page", value_name = "TYPE")]
    content_type: String,
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[arg(value_name = "CONTENT_TYPE")]
    content_type: String,
    #[arg(value_name = "PARENT_PAGE_ID")]
    parent_page_id: i64,
    #[arg(value_name = "SOURCE_JSON")]
    source: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Db(DbArgs { command })) => match command {
            DbSubcommand::Migrate => run_db_migrate(&runtime),
            DbSubcommand::Stats => run_db_stats(&runtime),
        },
        Some(Commands::Page(PageArgs { command })) => match command {
            PageSubcommand::Add(args) => run_page_add(&runtime, args),
            PageSubcommand::List => run_page_list(&runtime),
        },
        Some(Commands::Import(args)) => run_import(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, &render_default_config(&paths), args.force)?;

    println!("Initialized pagelift runtime layout");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("state_dir: {}", normalize_path(&paths.state_dir));
    println!("data_dir: {}", normalize_path(&paths.data_dir));
    println!("media_dir: {}", normalize_path(&paths.media_dir));
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("policy: {MIGRATIONS_POLICY_MESSAGE}");
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_db_migrate(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = run_migrations(&paths)?;

    println!("db migrate");
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("applied: {}", report.applied.len());
    for migration in &report.applied {
        println!("  - v{:03}_{}", migration.version, migration.name);
    }
    println!("current_version: {}", report.current_version);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_db_stats(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;

    println!("db stats");
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!("pending_migrations: {}", pending_migration_count(&paths)?);

    if status.db_exists {
        let store = Store::open(&paths)?;
        let stats = store.stats()?;
        println!("pages: {}", stats.pages);
        println!("content_items: {}", stats.content_items);
        println!("images: {}", stats.images);
        println!("revisions: {}", stats.revisions);
        println!("redirects: {}", stats.redirects);
    }
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_page_add(runtime: &RuntimeOptions, args: PageAddArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    ensure_migrated(&paths)?;
    let store = Store::open(&paths)?;

    let page = match args.parent {
        Some(parent_id) => {
            let parent = store
                .page_by_id(parent_id)?
                .with_context(|| format!("parent page {parent_id} not found"))?;
            let requested = requested_content_slug(args.slug.as_deref(), &args.title);
            let taken = store.child_slugs_with_prefix(parent.id, &requested)?;
            let slug = find_available_slug(&requested, &taken);
            store.add_child_page(
                &parent,
                &NewPage {
                    content_type: args.content_type,
                    title: args.title,
                    slug,
                    ..NewPage::default()
                },
            )?
        }
        None => {
            let slug = requested_content_slug(args.slug.as_deref(), &args.title);
            store.create_root_page(&args.title, &slug, &args.site, &args.content_type)?
        }
    };

    println!("Created page");
    println!("id: {}", page.id);
    println!("title: {}", page.title);
    println!("slug: {}", page.slug);
    println!("content_type: {}", page.content_type);
    println!("site: {}", page.site);
    println!("depth: {}", page.depth);
    Ok(())
}

fn run_page_list(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    ensure_migrated(&paths)?;
    let store = Store::open(&paths)?;

    let pages = store.list_pages()?;
    if pages.is_empty() {
        println!("pages: <empty> (run `pagelift page add` to seed the tree)");
        return Ok(());
    }
    for page in &pages {
        let indent = "  ".repeat(usize::try_from(page.depth.max(1) - 1).unwrap_or(0));
        println!(
            "{indent}{} (id: {}, type: {}, slug: {}, live: {})",
            page.title,
            page.id,
            page.content_type,
            page.slug,
            format_flag(page.live)
        );
    }
    Ok(())
}

fn run_import(runtime: &RuntimeOptions, args: ImportArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    ensure_migrated(&paths)?;
    let config = load_config(&paths.config_path)?;
    let store = Store::open(&paths)?;

    let Some(spec) = content_type_by_name(&args.content_type) else {
        bail!("unknown content type `{}`", args.content_type);
    };
    let parent = store.page_by_id(args.parent_page_id)?;
    if parent.is_none() && spec.kind == ContentKind::Page {
        bail!("parent page {} not found", args.parent_page_id);
    }

    let raw = fs::read_to_string(&args.source)
        .with_context(|| format!("failed to read {}", args.source.display()))?;
    let source: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", args.source.display()))?;

    let resolver = ImageResolver::new(&config, &paths)?;
    let importer = Importer::new(&store, &resolver, &config, spec, parent)?;
    let report = importer.process(&source)?;

    println!("import {}", args.content_type);
    println!("source: {}", normalize_path(&args.source));
    println!("created: {}", report.created);
    println!("skipped: {}", report.skipped);
    println!("errors: {}", report.errors.len());
    for error in &report.errors {
        println!(
            "  - record {} ({}): {}",
            error.index,
            error.legacy_id.as_deref().unwrap_or("<no id>"),
            error.message
        );
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn ensure_migrated(paths: &pagelift_core::runtime::ResolvedPaths) -> Result<()> {
    let pending = pending_migration_count(paths)?;
    if pending > 0 {
        bail!("{pending} schema migration(s) pending. {MIGRATIONS_POLICY_MESSAGE}");
    }
    Ok(())
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<pagelift_core::runtime::ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
