use std::env;

use dispatchflow::config::Config;
use dispatchflow::jobs::model::{Job, JobType};
use dispatchflow::jobs::store::JobStore;
use dispatchflow::jobs::submission::{SubmissionGate, SubmitRequest};
use dispatchflow::{telemetry, Backend};
use serde_json::{json, Value};
use uuid::Uuid;

const USAGE: &str = "dispatchctl <command>\n\
     Commands:\n\
     - submit <high|low> <payload-json>\n\
     - status <job_id>\n\
     - list [n]\n\
     - seed <n>\n\
     - purge <job_id>\n\
     \n\
     Backend is picked from DISPATCHFLOW_BACKEND / DATABASE_URL / REDIS_URL.\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("{USAGE}");
        std::process::exit(2);
    }

    let cfg = Config::from_env()?;
    telemetry::init(cfg.log_format);

    let backend = Backend::from_config(&cfg).await?;
    let gate = SubmissionGate::new(&backend, cfg.gate_config());

    match args[1].as_str() {
        "submit" => {
            let (Some(priority), Some(raw)) = (args.get(2), args.get(3)) else {
                anyhow::bail!("usage: dispatchctl submit <high|low> <payload-json>");
            };
            let payload: Value = serde_json::from_str(raw)?;
            let id = gate
                .submit(SubmitRequest::new(JobType::SendEmail.as_str(), priority, payload))
                .await?;
            println!("{}", json!({ "job_id": id, "status": "queued" }));
        }
        "status" => {
            let id = parse_id(args.get(2), "status")?;
            let job = gate.status(id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        "list" => {
            let n: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(20);
            for job in gate.list(n).await? {
                print_row(&job);
            }
        }
        "seed" => {
            let n: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10);
            seed(&gate, n).await?;
        }
        "purge" => {
            let id = parse_id(args.get(2), "purge")?;
            if backend.store().remove(id).await? {
                println!("purged {id}");
            } else {
                println!("no such job {id}");
            }
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn parse_id(arg: Option<&String>, cmd: &str) -> anyhow::Result<Uuid> {
    let raw = arg.ok_or_else(|| anyhow::anyhow!("usage: dispatchctl {cmd} <job_id>"))?;
    Ok(raw.parse()?)
}

async fn seed(gate: &SubmissionGate, n: usize) -> anyhow::Result<()> {
    for i in 0..n {
        let priority = if i % 2 == 0 { "high" } else { "low" };
        let payload = json!({
            "to": format!("user{i}@example.com"),
            "subject": "seeded",
            "message": format!("seed message #{i}"),
        });
        let id = gate
            .submit(SubmitRequest::new(JobType::SendEmail.as_str(), priority, payload))
            .await?;
        println!("+ queued {priority} job id={id}");
    }
    Ok(())
}

fn print_row(job: &Job) {
    println!(
        "{}  {:<15}  {:<4}  {}/{}  {}",
        job.id,
        job.status.as_str(),
        job.priority.as_str(),
        job.attempts,
        job.max_attempts,
        job.last_error_code.as_deref().unwrap_or("-"),
    );
}
