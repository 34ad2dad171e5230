fn main() {
    let cli = iac_graph::cli::parse();
    let code = iac_graph::app::run_cli(cli);
    if code != 0 {
        std::process::exit(code);
    }
}
