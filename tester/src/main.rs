//! Drives a full confirmation flow against a locally running server.
//!
//! ```sh
//! cargo run -p tester -- signup someone@example.com hunter2!
//! cargo run -p tester -- reset someone@example.com new-password!
//! ```
//!
//! The submitted flow then waits on the status poller; click the link from
//! the dispatched email to see the poll flip to Confirmed.

use std::env;

use serde::Deserialize;
use serde_json::json;

use server::poll::{
    check_reset_status, check_verify_status, FlowState, PollConfig, PollKind, StatusPoller,
};

#[derive(Deserialize)]
struct SignupReply {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResetReply {
    message: String,
    token_version: Option<u64>,
}

#[tokio::main]
async fn main() {
    let base_url =
        env::var("TESTER_BASE_URL").unwrap_or_else(|_| "http://localhost:1111".to_string());

    let args: Vec<String> = env::args().collect();
    let (mode, email, password) = match &args[..] {
        [_, mode, email, password] => (mode.as_str(), email.clone(), password.clone()),
        _ => {
            eprintln!("usage: tester <signup|reset> <email> <password>");
            return;
        }
    };

    let client = reqwest::Client::new();
    let mut poller = StatusPoller::new();
    let mut flow = FlowState::Submitting;
    println!("{flow:?}");

    match mode {
        "signup" => {
            let response = client
                .post(format!("{base_url}/api/auth/signup"))
                .json(&json!({
                    "username": "tester",
                    "email": email,
                    "password": password,
                }))
                .send()
                .await
                .expect("signup request failed");

            if !response.status().is_success() {
                flow = FlowState::Failed;
                println!("{flow:?}: {}", response.text().await.unwrap_or_default());
                return;
            }

            let reply: SignupReply = response.json().await.expect("signup reply decodes");
            println!("server: {}", reply.message);

            flow = FlowState::AwaitingConfirmation;
            println!("{flow:?}");

            let probe_client = client.clone();
            let probe_base = base_url.clone();
            let probe_email = email.clone();
            poller.start(PollKind::Signup, PollConfig::default(), move || {
                let client = probe_client.clone();
                let base_url = probe_base.clone();
                let email = probe_email.clone();
                async move { check_verify_status(&client, &base_url, &email).await }
            });

            let outcome = poller.wait(PollKind::Signup).await.unwrap();
            flow = FlowState::from_outcome(outcome);
            println!("{flow:?}");
        }
        "reset" => {
            let response = client
                .post(format!("{base_url}/api/auth/reset"))
                .json(&json!({ "email": email, "password": password }))
                .send()
                .await
                .expect("reset request failed");

            if !response.status().is_success() {
                flow = FlowState::Failed;
                println!("{flow:?}: {}", response.text().await.unwrap_or_default());
                return;
            }

            let reply: ResetReply = response.json().await.expect("reset reply decodes");
            println!("server: {}", reply.message);

            let Some(observed_version) = reply.token_version else {
                // Unknown identity: nothing will ever confirm, don't poll.
                flow = FlowState::Idle;
                println!("{flow:?}");
                return;
            };

            flow = FlowState::AwaitingConfirmation;
            println!("{flow:?}");

            let probe_client = client.clone();
            let probe_base = base_url.clone();
            let probe_email = email.clone();
            poller.start(PollKind::Reset, PollConfig::default(), move || {
                let client = probe_client.clone();
                let base_url = probe_base.clone();
                let email = probe_email.clone();
                async move { check_reset_status(&client, &base_url, &email, observed_version).await }
            });

            let outcome = poller.wait(PollKind::Reset).await.unwrap();
            flow = FlowState::from_outcome(outcome);
            println!("{flow:?}");
        }
        other => eprintln!("unknown mode: {other}"),
    }
}
