#![forbid(unsafe_code)]

fn main() {
    if let Err(error) = rfbrelay::run_from_env() {
        eprintln!("rfbrelay: {error}");
        std::process::exit(error.exit_code());
    }
}
