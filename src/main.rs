#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    ladder_server::logs::init_logger();

    ladder_server::app::run().await;
}
