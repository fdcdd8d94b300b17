use std::collections::BTreeSet;

use crate::commands::{connect, current_thread_runtime, load_config, CommandResult};
use pedido_db::{migrations, DemoCatalog, SeedResult};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match current_thread_runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect("seed", &config).await?;
        let outcome = load_and_verify(&pool).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", seed_message(&seeded)),
        Err(failure) => failure,
    }
}

async fn load_and_verify(pool: &pedido_db::DbPool) -> Result<SeedResult, CommandResult> {
    migrations::run_pending(pool)
        .await
        .map_err(|error| CommandResult::failure("seed", "migration", error.to_string(), 5))?;

    let seeded = DemoCatalog::load(pool)
        .await
        .map_err(|error| CommandResult::failure("seed", "seed_execution", error.to_string(), 5))?;

    let present = DemoCatalog::verify(pool).await.map_err(|error| {
        CommandResult::failure("seed", "seed_verification", error.to_string(), 6)
    })?;
    if !present {
        return Err(CommandResult::failure(
            "seed",
            "seed_verification",
            "demo catalog rows missing after load",
            6,
        ));
    }

    Ok(seeded)
}

fn seed_message(seeded: &SeedResult) -> String {
    format!(
        "demo catalog loaded: {} products ({})",
        seeded.products_seeded,
        join_types(&seeded.product_types)
    )
}

fn join_types(types: &BTreeSet<String>) -> String {
    if types.is_empty() {
        return "no product types".to_string();
    }
    types.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}
