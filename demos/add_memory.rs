use serde::{Deserialize, Serialize};
use serde_json::json;
use sock_rpc::{
    global_hub, ClientBuilder, CloseCode, CorrelationId, Envelope, Result, CORRELATION_FIELD,
};

#[derive(Debug, Serialize, Deserialize)]
struct AddRequest {
    a: i32,
    b: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct AddResponse {
    sum: i32,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // in-process peer answering `add`
    let mut listener = global_hub().listen("math");
    let server = tokio::spawn(async move {
        // ---
        let Some(mut peer) = listener.accept().await else {
            return;
        };

        while let Some(env) = peer.recv_envelope().await {
            if env.method != "add" {
                continue;
            }

            let Some(id) = env.args[CORRELATION_FIELD].as_str() else {
                continue;
            };
            let Ok(req) = env.args_as::<AddRequest>() else {
                continue;
            };

            let reply_method = CorrelationId::from(id).response_method();
            let reply = Envelope::new(reply_method, json!({"sum": req.a + req.b}));
            if peer.send(&reply).await.is_err() {
                break;
            }
        }
    });

    let client = ClientBuilder::new()
        .uri("memory://math")
        .client_id("Roxy")
        .on_connected(|c| println!("{} connected", c.client_id()))
        .on_disconnected(|c| println!("{} disconnected", c.client_id()))
        .build()?;

    client.ready().await?;

    let resp: AddResponse = client
        .request("add", &AddRequest { a: 20, b: 3 }, None)
        .await?;

    println!("20 + 3 = {}", resp.sum);

    client.close(CloseCode::NORMAL, "done").await?;
    let _ = server.await;
    Ok(())
}
