use elk_forwarder::app;

#[tokio::main]
async fn main() {
    if let Err(e) = app::main().await {
        eprintln!("elk-forwarder: {e}");
        std::process::exit(1);
    }
}
