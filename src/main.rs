use issue_mirror::config::Settings;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let result = match Settings::from_env() {
        Ok(settings) => issue_mirror::run(settings).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
