use std::process;

fn main() {
    if let Err(err) = crossroads::cli::run() {
        eprintln!("crossroads: {err:?}");
        process::exit(1);
    }
}
