use tabletalk::chat::ChatApp;
use tabletalk::logging::{app_error, init_logging};
use tabletalk::settings::load_settings;

#[tokio::main]
async fn main() {
    // .env supplies GEMINI_API_KEY / GOOGLE_ACCESS_TOKEN defaults; a missing
    // file is fine.
    dotenvy::dotenv().ok();
    init_logging();

    let settings = load_settings();
    let mut app = ChatApp::new(settings);

    if let Err(err) = app.run().await {
        app_error(format!("Session ended with error: {}", err));
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
