use braid::Rx;
use exec_demo::{ExecReply, ExecRequest, Request};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let (requests_tx, requests_rx) = braid::channel::<Request>(16);
    tokio::spawn(process_requests(requests_rx));

    braid_stream::listen_and_serve("127.0.0.1:7000", requests_tx).await?;
    Ok(())
}

async fn process_requests(mut requests: Rx<Request>) {
    while let Some(request) = requests.recv().await {
        // One task per request; a panicking handler takes down nothing but
        // its own task.
        tokio::spawn(async move {
            if let Some(exec) = request.exec {
                handle_exec(exec).await;
            }
            if let Some(search) = request.search {
                tracing::warn!(query = %search.query, "search is not implemented");
            }
        });
    }
}

/// Streams a canned transcript; a real server would spawn the command and
/// pump its stdio through the reply channel.
async fn handle_exec(request: ExecRequest) {
    tracing::info!(command = %request.command, args = ?request.args, "exec");
    let script: [(&[u8], &[u8], bool); 3] = [
        (b"f", b"b", false),
        (b"o", b"a", false),
        (b"o", b"r", true),
    ];
    for (stdout, stderr, done) in script {
        let reply = ExecReply {
            stdout: stdout.to_vec(),
            stderr: stderr.to_vec(),
            done,
        };
        if request.reply.send(reply).await.is_err() {
            tracing::debug!("caller went away mid-reply");
            return;
        }
    }
    // Dropping the reply handle closes the channel on the caller's side.
}
