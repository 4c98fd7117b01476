use c2im::runner::{run, Args};
use structopt::StructOpt;

fn main() {
    env_logger::init();
    let args = Args::from_args();
    if let Err(e) = run(&args) {
        eprintln!("error: {}", e);
        std::process::exit(e.exit_code());
    }
}
