// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Walks a gateway through the failure modes it recovers from, using scripted collaborators:
//!
//! 1. An expired session that is refreshed and the call reissued
//! 2. A refresh that fails, answered by the public credential fallback
//! 3. A blocked transport, answered by the manual fallback
//! 4. A failing destination that trips its circuit
//!
//! Run with `cargo run --example invoke --features test-util`.

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use lifeline::testing::{FakeRawTransport, FakeSession, FakeTransport};
use lifeline::{
    CircuitRegistry, Credential, Gateway, GatewayOptions, InvocationResult, InvokeOptions, RawFailure, RawResponse,
};
use serde_json::json;
use tick::ClockControl;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::registry().with(tracing_subscriber::fmt::layer()).init();

    let transport = FakeTransport::new();
    let raw = FakeRawTransport::new();
    let session = FakeSession::signed_in("expired-token");
    let control = ClockControl::new();

    let options = GatewayOptions::new()
        .base_url("https://project.example.com")
        .public_credential("anon-key");
    let registry = Arc::new(CircuitRegistry::new(*options.get_circuit(), control.to_clock()));
    let gateway = Gateway::new(transport.clone(), raw.clone(), session.clone(), options).registry(Arc::clone(&registry));

    let unauthorized = || RawFailure::structured(Some(StatusCode::UNAUTHORIZED), "Invalid JWT", None);

    // 1. expired session
    transport.push(Err(unauthorized())).push(Ok(json!({ "url": "quotes/42.pdf" })));
    session.push_refresh(Ok(Credential::from("fresh-token")));
    report(
        "refresh and reissue",
        gateway
            .invoke("generate-quote-pdf", InvokeOptions::new().body(json!({ "quote_id": 42 })))
            .await,
    );

    // 2. refresh fails, public credential answers
    transport.push(Err(unauthorized()));
    raw.push(Ok(RawResponse::json(StatusCode::OK, &json!({ "rates": [1180, 1320] }))));
    report(
        "public credential",
        gateway
            .invoke("fetch-rates", InvokeOptions::new().body(json!({ "lane": "SHA-LAX" })))
            .await,
    );

    // 3. blocked transport
    transport.push(Err(RawFailure::transport("Failed to send a request to the function")));
    raw.push(Ok(RawResponse::json(StatusCode::OK, &json!({ "tables": 31 }))));
    report("manual transport", gateway.invoke("export-schema", InvokeOptions::new()).await);

    // 4. failing destination
    for _ in 0..3 {
        transport.push(Err(RawFailure::transport("connection refused")));
        report("send-email", gateway.invoke("send-email", InvokeOptions::new()).await);
    }
    report("send-email while open", gateway.invoke("send-email", InvokeOptions::new()).await);

    control.advance(Duration::from_millis(1500));
    transport.push(Ok(json!({ "queued": true })));
    report("send-email after cooldown", gateway.invoke("send-email", InvokeOptions::new()).await);

    println!("snapshot: {:?}", registry.snapshot("send-email"));
}

fn report(label: &str, result: InvocationResult) {
    match result.into_parts() {
        (Some(data), _) => println!("{label}: ok {data}"),
        (_, Some(error)) => println!("{label}: {} error: {error}", error.classification().as_str()),
        (None, None) => unreachable!("an invocation result holds data or an error"),
    }
}
