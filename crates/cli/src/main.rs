use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tabula_engine::{EngineConfig, EngineContext, SearchMode};
use tabula_types::{Filter, FilterValue};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod fixture;

use fixture::FixtureSource;

/// Drive the view engine against a JSON fixture backend and print the resulting view model.
#[derive(Parser, Debug)]
#[command(name = "tabula", version, about)]
struct Args {
    /// Fixture file standing in for the remote backend
    #[arg(long)]
    fixture: PathBuf,

    /// Form to open
    #[arg(long)]
    form: i64,

    /// Top-level tree filter, as COLUMN=VALUE
    #[arg(long, value_parser = parse_filter)]
    tree: Option<Filter>,

    /// Nested filter, as COLUMN=VALUE; repeatable
    #[arg(long = "filter", value_parser = parse_filter)]
    filters: Vec<Filter>,

    /// Search query applied to the main view
    #[arg(long)]
    search: Option<String>,

    /// Use typo tolerant search
    #[arg(long)]
    approximate: bool,

    /// Widget whose table permissions to load
    #[arg(long)]
    widget: Option<i64>,

    /// Select this main-view row (original index) and load its sub view
    #[arg(long)]
    row: Option<usize>,

    /// Sub view to show for the selected row
    #[arg(long)]
    sub_order: Option<i64>,

    /// Engine configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = EngineConfig::load(args.config.as_deref()).context("loading engine configuration")?;
    let source = Arc::new(FixtureSource::load(&args.fixture)?);
    let mut context = EngineContext::init(config);
    let mut session = context.open_session(source.clone());

    session.select_form(args.form);
    session.set_parent_context(source.sub_orders(args.form));
    if let Some(widget) = args.widget {
        session.load_table_meta(widget).await?.require_committed()?;
    }

    session.load().await?.require_committed()?;
    if let Some(Filter { table_column_id, value }) = args.tree {
        session.apply_tree_root_filter(table_column_id, value).await?.require_committed()?;
    }
    for Filter { table_column_id, value } in args.filters {
        session.apply_nested_filter(table_column_id, value).await?.require_committed()?;
    }

    if args.approximate {
        session.set_search_mode(SearchMode::Approximate(context.config().approximate_options()));
    }
    if let Some(query) = args.search {
        session.set_search_query(query);
    }

    if let Some(sub_order) = args.sub_order {
        session.change_sub_order(sub_order).await?;
    }
    if let Some(index) = args.row {
        let Some(row) = session.row_at(index).cloned() else {
            bail!("row {index} is not in the main view");
        };
        session.select_row(&row).await?;
    }

    let view = session.view_model();
    info!(
        rows = view.main.as_ref().map(|main| main.rows.len()).unwrap_or_default(),
        filters = view.filters.len(),
        "view ready"
    );
    println!("{}", serde_json::to_string_pretty(&view)?);

    session.close();
    context.teardown();
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// `COLUMN=VALUE`; integer values are sent as numbers.
fn parse_filter(raw: &str) -> Result<Filter, String> {
    let (column, value) = raw.split_once('=').ok_or_else(|| format!("expected COLUMN=VALUE, got '{raw}'"))?;
    let table_column_id: i64 = column
        .trim()
        .parse()
        .map_err(|_| format!("column must be an integer table column id, got '{column}'"))?;
    let value = value.trim();
    let value = match value.parse::<i64>() {
        Ok(number) => FilterValue::from(number),
        Err(_) => FilterValue::from(value),
    };
    Ok(Filter { table_column_id, value })
}
