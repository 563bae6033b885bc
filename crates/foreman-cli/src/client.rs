//! Thin HTTP clients for the `prompt` and `health` subcommands, driving an
//! already-running daemon's Job/Run Service surface (spec.md §4.7).

use anyhow::{bail, Context, Result};
use serde_json::json;

pub async fn submit_prompt(base_url: &str, prompt: &str, job_id: Option<String>) -> Result<()> {
    let client = reqwest::Client::new();
    let mut body = json!({ "prompt": prompt });
    if let Some(job_id) = job_id {
        body["jobId"] = json!(job_id);
    }

    let resp = client
        .post(format!("{base_url}/prompt"))
        .json(&body)
        .send()
        .await
        .with_context(|| format!("submitting prompt to {base_url}"))?;

    if !resp.status().is_success() {
        bail!("daemon rejected prompt: HTTP {}", resp.status());
    }

    let body: serde_json::Value = resp.json().await.context("parsing daemon response")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

pub async fn check_health(base_url: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{base_url}/health"))
        .send()
        .await
        .with_context(|| format!("checking health of {base_url}"))?;

    if !resp.status().is_success() {
        bail!("daemon unhealthy: HTTP {}", resp.status());
    }
    println!("ok");
    Ok(())
}
