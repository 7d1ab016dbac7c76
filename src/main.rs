fn main() {
    if let Err(error) = kline_engine_lib::run() {
        eprintln!("kline engine demo failed: {error}");
        std::process::exit(1);
    }
}
