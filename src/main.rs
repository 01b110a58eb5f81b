fn main() {
    peat_pipeline::cli::run();
}
