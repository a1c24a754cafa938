fn main() {
    if let Err(e) = screencap_lib::run() {
        eprintln!("screencap: {}", e);
        std::process::exit(1);
    }
}
