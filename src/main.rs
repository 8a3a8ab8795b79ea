fn main() {
    lagrangian_pipeline::cli::run();
}
