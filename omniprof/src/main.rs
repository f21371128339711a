fn main() {
    if let Err(e) = omniprof::run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
