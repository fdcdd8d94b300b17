use std::process::ExitCode;

fn main() -> ExitCode {
    pedido_cli::run()
}
