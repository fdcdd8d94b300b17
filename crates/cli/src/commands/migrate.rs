use crate::commands::{connect, current_thread_runtime, load_config, CommandResult};
use pedido_db::migrations;

pub fn run() -> CommandResult {
    let config = match load_config("migrate") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match current_thread_runtime("migrate") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect("migrate", &config).await?;
        let applied = migrations::run_pending(&pool).await.map_err(|error| {
            CommandResult::failure("migrate", "migration", error.to_string(), 5)
        });
        pool.close().await;
        applied
    });

    match result {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err(failure) => failure,
    }
}
