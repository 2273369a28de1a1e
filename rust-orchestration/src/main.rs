use clap::Parser;
use log::error;
use sdfsyde_blueprints::{decision_models_schemas, init_logging, SynthesisArgs};

fn main() {
    let args = SynthesisArgs::parse();
    init_logging(args.verbosity.as_deref());
    if args.print_schema {
        for schema in decision_models_schemas() {
            println!("{}", schema);
        }
        return;
    }
    if let Err(e) = sdfsyde_orchestration::run(&args) {
        error!("{}", e);
        std::process::exit(1);
    }
}
