//! `tripctl plan` command implementation

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::Args;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::{TripClient, TripFormData, TripPlanResponse};
use crate::config::Config;
use crate::planner;
use crate::store::{SessionState, Storage, TripStore};
use crate::stream::{AgentId, AgentProgress, AgentStatus};

const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Args)]
pub struct PlanArgs {
    /// Destination city
    #[arg(long, required_unless_present = "last")]
    city: Option<String>,

    /// First day of the trip (YYYY-MM-DD)
    #[arg(long, required_unless_present = "last")]
    start_date: Option<String>,

    /// Last day of the trip (YYYY-MM-DD)
    #[arg(long, required_unless_present = "last")]
    end_date: Option<String>,

    /// Number of travel days (derived from the dates when omitted)
    #[arg(long)]
    days: Option<u32>,

    #[arg(long, default_value = "public transit")]
    transportation: String,

    #[arg(long, default_value = "hotel")]
    accommodation: String,

    /// Travel preference, repeatable
    #[arg(long = "preference", value_name = "PREFERENCE")]
    preferences: Vec<String>,

    /// Free-form requirements passed to the planner
    #[arg(long)]
    note: Option<String>,

    /// Resubmit the last saved trip form
    #[arg(long, conflicts_with_all = ["city", "start_date", "end_date"])]
    last: bool,

    /// Use the one-shot endpoint instead of streaming progress
    #[arg(long)]
    no_stream: bool,

    /// Print the full response as JSON
    #[arg(long)]
    json: bool,

    /// Save the plan to your history (requires a stored token)
    #[arg(long)]
    save: bool,
}

impl PlanArgs {
    pub fn to_form_data(&self) -> Result<TripFormData> {
        let (Some(city), Some(start), Some(end)) = (&self.city, &self.start_date, &self.end_date)
        else {
            bail!("--city, --start-date and --end-date are required");
        };

        let start_day = parse_date(start)?;
        let end_day = parse_date(end)?;
        if end_day < start_day {
            bail!("End date {} is before start date {}", end, start);
        }
        let span = (end_day - start_day).num_days() + 1;
        let travel_days = match self.days {
            Some(0) => bail!("--days must be at least 1"),
            Some(days) => days,
            None => u32::try_from(span).context("Trip is too long")?,
        };

        Ok(TripFormData {
            city: city.trim().to_string(),
            start_date: start_day.format("%Y-%m-%d").to_string(),
            end_date: end_day.format("%Y-%m-%d").to_string(),
            travel_days,
            transportation: self.transportation.clone(),
            accommodation: self.accommodation.clone(),
            preferences: self.preferences.clone(),
            free_text_input: self.note.clone(),
        })
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", s))
}

pub async fn run(profile: &str, config: &Config, args: PlanArgs) -> Result<()> {
    let storage = Storage::new(profile)?;
    let store = TripStore::new(storage.clone());

    let form = if args.last {
        store
            .form_data()
            .context("No saved trip form; run `tripctl plan --city ...` first")?
    } else {
        args.to_form_data()?
    };

    let client = Arc::new(TripClient::new(config)?.with_storage(storage.clone()));

    println!(
        "Planning {} day(s) in {} ({} → {})",
        form.travel_days, form.city, form.start_date, form.end_date
    );

    let canceller = spawn_ctrl_c_canceller(Arc::clone(&client));
    let printer = spawn_progress_printer(store.subscribe());

    let result = if args.no_stream {
        planner::run_blocking(&client, &store, &form).await
    } else {
        planner::run_streaming(&client, &store, &form).await
    };

    printer.abort();

    let state = store.snapshot();
    print_agents(&state);

    let outcome = report(&client, &storage, &form, result, &args).await;
    canceller.abort();
    outcome
}

async fn report(
    client: &TripClient,
    storage: &Storage,
    form: &TripFormData,
    result: crate::api::Result<TripPlanResponse>,
    args: &PlanArgs,
) -> Result<()> {
    let response = match result {
        Ok(response) => response,
        Err(e) if e.is_cancelled() => {
            println!("Planning cancelled.");
            return Ok(());
        }
        Err(e) => bail!("Failed to generate trip plan: {}", e),
    };

    print_response(&response, args.json)?;

    if response.requires_login {
        println!();
        println!("Log in to save this plan to your history.");
    }

    if args.save {
        save_plan(client, storage, form, &response).await?;
    }

    Ok(())
}

/// Installing the ctrl-c listener replaces the default SIGINT handling, so
/// it stays up until the command is done. A press cancels the plan request
/// in flight, or exits when there is none.
fn spawn_ctrl_c_canceller(client: Arc<TripClient>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            match interrupt(&client) {
                Interrupt::Cancelled => eprintln!("Cancelling..."),
                Interrupt::Exit => std::process::exit(INTERRUPTED_EXIT_CODE),
            }
        }
    })
}

#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    Cancelled,
    Exit,
}

fn interrupt(client: &TripClient) -> Interrupt {
    if client.cancel_current_request() {
        Interrupt::Cancelled
    } else {
        Interrupt::Exit
    }
}

fn spawn_progress_printer(mut rx: watch::Receiver<SessionState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last: BTreeMap<AgentId, (AgentStatus, u8)> = BTreeMap::new();
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            let overall = state.overall_progress();
            for progress in state.progress.values() {
                let key = (progress.status, progress.progress);
                if last.get(&progress.agent) == Some(&key) {
                    continue;
                }
                last.insert(progress.agent, key);
                if progress.status != AgentStatus::Pending {
                    eprintln!("[{:>3}%] {}", overall, format_agent(progress));
                }
            }
        }
    })
}

fn format_agent(progress: &AgentProgress) -> String {
    let marker = match progress.status {
        AgentStatus::Pending => "·",
        AgentStatus::Running => "…",
        AgentStatus::Completed => "✓",
        AgentStatus::Failed => "✗",
    };
    format!(
        "{} {:<12} {:>3}%  {}",
        marker,
        progress.agent.as_str(),
        progress.progress,
        progress.message
    )
}

fn print_agents(state: &SessionState) {
    eprintln!();
    for progress in state.progress.values() {
        let found = state.partial(progress.agent).len();
        if found > 0 {
            eprintln!("{} ({} result(s))", format_agent(progress), found);
        } else {
            eprintln!("{}", format_agent(progress));
        }
    }
    eprintln!("Overall: {}%", state.overall_progress());
    if let Some(error) = &state.error {
        eprintln!("Error: {}", error);
    }
    eprintln!();
}

fn print_response(response: &TripPlanResponse, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }

    println!("✓ {}", response.message);
    if let Some(plan) = &response.data {
        println!("{}", serde_json::to_string_pretty(plan.as_value())?);
    }
    Ok(())
}

async fn save_plan(
    client: &TripClient,
    storage: &Storage,
    form: &TripFormData,
    response: &TripPlanResponse,
) -> Result<()> {
    let Some(plan) = &response.data else {
        bail!("Response has no plan to save");
    };
    if storage.token().is_none() {
        bail!("Not logged in; store a token with `tripctl auth set-token` first");
    }

    let saved = client
        .save_trip_plan(form, plan)
        .await
        .context("Failed to save plan")?;
    if saved.success {
        println!("✓ Saved to history: {}", saved.message);
    } else {
        bail!("Failed to save plan: {}", saved.message);
    }
    Ok(())
}
