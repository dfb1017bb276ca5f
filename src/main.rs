#[tokio::main]
async fn main() {
    if let Err(err) = eurora_capture_lib::host::run_native_host().await {
        log::error!("native host failed: {err:#}");
        eprintln!("eurora-native-host: {err:#}");
        std::process::exit(1);
    }
}
