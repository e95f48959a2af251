#[tokio::main]
async fn main() {
    if let Err(err) = qore_api::run().await {
        tracing::error!(error = %err, "qore-api failed");
        std::process::exit(1);
    }
}
