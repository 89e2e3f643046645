//! CLI command definitions, routing, and tracing setup.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use leadflow_core::rotation::{plan_daily, plan_random};
use leadflow_core::scoring::HeuristicScorer;
use leadflow_core::{
    Collaborators, Pipeline, PipelineSettings, ProgressReporter, RunOutcome, RunSummary,
};
use leadflow_fetcher::HttpFetcher;
use leadflow_llm::{LlmCandidateExtractor, LlmClient, LlmEmailPredictor, LlmOutreachDrafter};
use leadflow_search::SerperClient;
use leadflow_shared::{
    AppConfig, ContactPath, RunConfig, Stage, database_path, init_config, load_config,
    validate_api_keys,
};
use leadflow_storage::Storage;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Leadflow: daily trigger-based lead discovery.
#[derive(Parser)]
#[command(
    name = "leadflow",
    version,
    about = "Find people with fresh career triggers, enrich them, and draft outreach.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Execute the pipeline for a date.
    Run {
        /// Sample a random rotation instead of the daily schedule.
        #[arg(long)]
        manual: bool,

        /// Re-execute even if the date already has a completed run.
        #[arg(long)]
        force: bool,

        /// Run date as YYYY-MM-DD (defaults to today).
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// List recent runs.
    Runs {
        /// Maximum number of runs to show.
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// Show the leads stored for a run date.
    Leads {
        /// Run date as YYYY-MM-DD.
        #[arg(long)]
        date: NaiveDate,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "leadflow=info",
        1 => "leadflow=debug",
        _ => "leadflow=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            manual,
            force,
            date,
        } => cmd_run(manual, force, date).await,
        Command::Runs { limit } => cmd_runs(limit).await,
        Command::Leads { date } => cmd_leads(date).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(manual: bool, force: bool, date: Option<NaiveDate>) -> Result<()> {
    // Validate API keys before doing anything
    let config = load_config()?;
    validate_api_keys(&config)?;

    let run_date = date.unwrap_or_else(|| Local::now().date_naive());
    let plan = if manual {
        plan_random(&config)
    } else {
        plan_daily(&config, run_date)
    };

    info!(
        %run_date,
        geo = %plan.geo,
        trigger = %plan.trigger_focus,
        industry = plan.industry_focus.as_deref().unwrap_or("-"),
        mode = ?plan.mode,
        "planned rotation"
    );

    let storage = Arc::new(Storage::open(&database_path(&config)?).await?);
    let pipeline = build_pipeline(&config, storage, run_date, force)?;

    let reporter = CliProgress::new();
    let outcome = pipeline.run(&plan, run_date, &reporter).await;
    reporter.clear();

    match outcome? {
        RunOutcome::Completed(summary) => print_summary(&plan, &summary),
        RunOutcome::AlreadyCompleted(run) => {
            println!("Run for {run_date} already completed ({}). Use --force to re-run.", run.id);
        }
        RunOutcome::AlreadyRunning(run) => {
            return Err(eyre!(
                "run for {run_date} is still marked running ({}); use --force if it was interrupted",
                run.id
            ));
        }
    }
    Ok(())
}

/// Wire production collaborators from config.
fn build_pipeline(
    config: &AppConfig,
    storage: Arc<Storage>,
    run_date: NaiveDate,
    force: bool,
) -> Result<Pipeline> {
    let llm = Arc::new(LlmClient::from_config(&config.llm)?);
    info!(model = llm.model(), "llm client ready");

    let scorer = HeuristicScorer::new(storage.clone()).with_reference_date(run_date);
    let collaborators = Collaborators {
        search: Arc::new(SerperClient::from_config(&config.search)?),
        fetcher: Arc::new(HttpFetcher::new(&config.fetch)?),
        extractor: Arc::new(LlmCandidateExtractor::new(llm.clone())),
        scorer: Arc::new(scorer),
        predictor: Arc::new(LlmEmailPredictor::new(llm.clone())),
        drafter: Arc::new(LlmOutreachDrafter::new(llm)),
        recorder: storage,
    };

    let settings = PipelineSettings::from_config(&config.pipeline).with_force(force);
    Ok(Pipeline::new(collaborators, settings))
}

fn print_summary(plan: &RunConfig, summary: &RunSummary) {
    let stats = &summary.stats;
    println!();
    println!("  Run complete for {}", summary.run_date);
    println!("  ID:         {}", summary.run_id);
    println!(
        "  Rotation:   {} / {}{}",
        plan.geo,
        plan.trigger_focus,
        plan.industry_focus
            .as_deref()
            .map(|i| format!(" / {i}"))
            .unwrap_or_default()
    );
    println!("  Queries:    {}", stats.queries_executed);
    println!("  Results:    {}", stats.search_results_found);
    println!("  Pages:      {}", stats.pages_fetched);
    println!("  Candidates: {}", stats.candidates_extracted);
    println!("  Leads:      {}", stats.leads_selected);
    println!("  Drafts:     {}", stats.drafts_generated);
    println!("  Errors:     {}", stats.errors.len());
    println!("  Time:       {:.1}s", summary.elapsed.as_secs_f64());
    println!();

    for lead in &summary.leads {
        let c = &lead.candidate;
        println!(
            "  [{}] {:>5.1}  {}{}",
            lead.tier,
            lead.score,
            c.full_name,
            describe_role(c.title.as_deref(), c.company.as_deref())
        );
    }
    if !summary.leads.is_empty() {
        println!();
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn clear(&self) {
        self.spinner.finish_and_clear();
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Search => "Searching for trigger news",
        Stage::Fetch => "Fetching pages",
        Stage::Extract => "Extracting candidates",
        Stage::Score => "Scoring and selecting leads",
        Stage::ContactEnrichment => "Enriching contacts",
        Stage::ColleagueEnrichment => "Finding colleagues",
        Stage::Draft => "Drafting outreach",
        Stage::Persist => "Saving leads",
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, stage: Stage) {
        self.spinner.set_message(stage_label(stage));
    }

    fn item(&self, stage: Stage, current: usize, total: usize) {
        self.spinner
            .set_message(format!("{} [{current}/{total}]", stage_label(stage)));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// runs / leads
// ---------------------------------------------------------------------------

/// Open the database for reporting, or `None` if nothing has run yet.
async fn open_for_reading(config: &AppConfig) -> Result<Option<Storage>> {
    let path = database_path(config)?;
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(Storage::open_readonly(&path).await?))
}

async fn cmd_runs(limit: u32) -> Result<()> {
    let config = load_config()?;
    let Some(storage) = open_for_reading(&config).await? else {
        println!("No runs yet.");
        return Ok(());
    };

    let runs = storage.list_runs(limit).await?;
    if runs.is_empty() {
        println!("No runs yet.");
        return Ok(());
    }

    println!(
        "{:<10}  {:<7}  {:<6}  {:<20}  {:<14}  {:>5}  {:>6}  {:>6}",
        "DATE", "STATUS", "MODE", "GEO", "TRIGGER", "LEADS", "DRAFTS", "ERRORS"
    );
    for run in runs {
        println!(
            "{:<10}  {:<7}  {:<6}  {:<20}  {:<14}  {:>5}  {:>6}  {:>6}",
            run.run_date,
            run.status.as_str(),
            format!("{:?}", run.config.mode).to_lowercase(),
            run.config.geo,
            run.config.trigger_focus,
            run.stats.leads_selected,
            run.stats.drafts_generated,
            run.stats.errors.len(),
        );
        if let Some(error) = &run.error {
            println!("            error: {error}");
        }
    }
    Ok(())
}

async fn cmd_leads(date: NaiveDate) -> Result<()> {
    let config = load_config()?;
    let storage = open_for_reading(&config)
        .await?
        .ok_or_else(|| eyre!("no database yet; run `leadflow run` first"))?;

    let run = storage
        .get_run_by_date(date)
        .await?
        .ok_or_else(|| eyre!("no run found for {date}"))?;

    let leads = storage.list_leads(&run.id).await?;
    println!("Run {date} ({}): {} leads", run.status.as_str(), leads.len());
    println!();

    for lead in &leads {
        let c = &lead.candidate;
        println!(
            "[{}] {:>5.1}  {}{}",
            lead.tier,
            lead.score,
            c.full_name,
            describe_role(c.title.as_deref(), c.company.as_deref())
        );
        if !c.rationale_short.is_empty() {
            println!("      why:     {}", c.rationale_short);
        }
        if let Some(contact) = best_contact(&c.contact_paths) {
            println!("      contact: {} ({:?})", contact.value, contact.kind);
        }
        if let Some(source) = &c.source_url {
            println!("      source:  {source}");
        }
        if let Some((version, email)) = storage.latest_email(&run.id, &lead.person_key).await? {
            println!("      draft:   v{version} [{}] {}", email.tone, email.subject);
        }
    }
    Ok(())
}

fn describe_role(title: Option<&str>, company: Option<&str>) -> String {
    match (title, company) {
        (Some(t), Some(c)) => format!(", {t} at {c}"),
        (Some(t), None) => format!(", {t}"),
        (None, Some(c)) => format!(", {c}"),
        (None, None) => String::new(),
    }
}

fn best_contact(paths: &[ContactPath]) -> Option<&ContactPath> {
    paths.iter().max_by_key(|p| p.kind.trust())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
