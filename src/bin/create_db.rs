use ladder_server::persistence::{init_schema, new_pool_from_env};

fn main() {
    dotenvy::dotenv().ok();

    let db_path = std::env::var("LADDER_DB").expect("LADDER_DB env var not set");
    let parent = std::path::Path::new(&db_path)
        .parent()
        .expect("Failed to get parent directory of DB path");
    if !parent.as_os_str().is_empty() && !parent.exists() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directory for DB");
        println!("Created parent directory for DB at {}", parent.display());
    }

    let pool = new_pool_from_env();
    init_schema(&pool).expect("Failed to create schema");
    println!("Created schema in {}", db_path);
}
