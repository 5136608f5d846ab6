fn main() -> std::process::ExitCode {
    interlinear_reader_lib::run()
}
