fn main() {
    if let Err(err) = flowpomo_lib::run() {
        eprintln!("flowpomo: {err:#}");
        std::process::exit(1);
    }
}
