use clap::{Parser, Subcommand};
use reqwest::blocking::Client;
use serde_json::Value;
use std::thread::sleep;
use std::time::Duration;

mod script;

#[derive(Parser)]
#[command(name = "triage")]
#[command(about = "Triage service CLI")]
struct Cli {
    /// Base URL of a running triage service
    #[arg(long, global = true, default_value = "http://localhost:3000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scripted call as provider webhooks
    SimulateCall {
        /// Caller phone number
        #[arg(long, default_value = "+15559990001")]
        phone: String,
        /// Call id (random when omitted)
        #[arg(long)]
        call_id: Option<String>,
        /// End the call with a transfer to a human operator
        #[arg(long)]
        transfer: bool,
        /// Pause between conversation updates, in milliseconds
        #[arg(long, default_value_t = 300)]
        step_ms: u64,
    },
    /// Re-run AI analysis for a finished call
    Analyze {
        /// Call id
        call_id: String,
    },
    /// Check that the service is up
    Health,
}

fn post(client: &Client, url: &str, body: &Value) -> Result<Value, Box<dyn std::error::Error>> {
    let res = client.post(url).json(body).send()?;
    let status = res.status();
    let body: Value = res.json().unwrap_or(Value::Null);
    if !status.is_success() {
        return Err(format!("{url} returned HTTP {status}: {body}").into());
    }
    Ok(body)
}

fn simulate_call(
    client: &Client,
    base: &str,
    phone: &str,
    call_id: &str,
    transfer: bool,
    step: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let webhook = format!("{base}/webhook");
    let started_at = chrono::Utc::now();
    let lines = script::script(transfer);

    println!("Simulating call {call_id} from {phone}");
    post(client, &webhook, &script::status_update(call_id, phone, "in-progress"))?;

    for n in 1..=lines.len() {
        sleep(step);
        post(
            client,
            &webhook,
            &script::conversation_update(call_id, phone, &lines[..n]),
        )?;
        let (role, text) = lines[n - 1];
        println!("  {role:>9}: {text}");
    }

    sleep(step);
    let report = script::end_of_call_report(
        call_id,
        phone,
        &lines,
        started_at,
        chrono::Utc::now(),
        script::ended_reason(transfer),
    );
    post(client, &webhook, &report)?;
    println!(
        "Call ended ({}). Check {base}/calls/{call_id} once analysis finishes.",
        script::ended_reason(transfer)
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let base = cli.url.trim_end_matches('/');
    let client = Client::builder().timeout(Duration::from_secs(60)).build()?;

    match cli.command {
        Commands::SimulateCall {
            phone,
            call_id,
            transfer,
            step_ms,
        } => {
            let call_id = call_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            simulate_call(
                &client,
                base,
                &phone,
                &call_id,
                transfer,
                Duration::from_millis(step_ms),
            )?;
        }
        Commands::Analyze { call_id } => {
            let url = format!("{base}/calls/{call_id}/analyze");
            let res = client.post(&url).send()?;
            let status = res.status();
            let body: Value = res.json().unwrap_or(Value::Null);
            if status.is_success() {
                println!(
                    "Call {}: {} | {} | {}",
                    call_id, body["status"], body["triageLevel"], body["reasonShort"]
                );
            } else {
                eprintln!("Analysis failed (HTTP {status}): {}", body["error"]);
                std::process::exit(1);
            }
        }
        Commands::Health => {
            let body: Value = client.get(format!("{base}/health")).send()?.json()?;
            println!("{}", body["message"].as_str().unwrap_or("unknown"));
            if body["ok"] != true {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
