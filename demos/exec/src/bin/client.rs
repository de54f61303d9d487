use std::time::Duration;

use braid::Tx;
use exec_demo::{ExecReply, ExecRequest, Request};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let (requests, mut outbound) = braid::channel::<Request>(100);
    tokio::spawn(async move {
        loop {
            if let Err(err) = braid_stream::dial_and_deliver("127.0.0.1:7000", &mut outbound).await
            {
                tracing::warn!(%err, "dial failed");
            } else {
                tracing::info!("connection ended, reconnecting");
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    });

    let (stdout, stderr) = exec(&requests, "test", &["abc"]).await?;
    println!(
        "{} {}",
        String::from_utf8_lossy(&stdout),
        String::from_utf8_lossy(&stderr)
    );
    Ok(())
}

/// Send one exec request and gather the streamed replies. The stream ending
/// without a final `done` means the connection died mid-call.
async fn exec(
    requests: &Tx<Request>,
    command: &str,
    args: &[&str],
) -> anyhow::Result<(Vec<u8>, Vec<u8>)> {
    let (reply_tx, mut reply_rx) = braid::channel::<ExecReply>(10);
    requests
        .send(Request {
            exec: Some(ExecRequest {
                command: command.to_owned(),
                args: args.iter().map(|arg| arg.to_string()).collect(),
                reply: reply_tx,
            }),
            search: None,
        })
        .await?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut done = false;
    while let Some(reply) = reply_rx.recv().await {
        stdout.extend_from_slice(&reply.stdout);
        stderr.extend_from_slice(&reply.stderr);
        done = reply.done;
    }
    if !done {
        anyhow::bail!("rpc failed");
    }
    Ok((stdout, stderr))
}
