use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use structopt::StructOpt;

use texturer::assign_textures::AssignTexturesCommand;
use texturer::preview_chunk::PreviewChunkCommand;

#[derive(StructOpt)]
#[structopt(about = "Scan mesh texture-coordinate assigner")]
struct Opts {
    #[structopt(help = "Print debug messages", long, short = "v")]
    verbose: bool,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
enum Command {
    AssignTextures(AssignTexturesCommand),
    PreviewChunk(PreviewChunkCommand),
}

fn main() {
    let opts = Opts::from_args();

    let level = if opts.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Err(err) = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ) {
        eprintln!("failed to init logger: {}", err);
    }

    let res = match opts.command {
        Command::AssignTextures(command) => command.run(),
        Command::PreviewChunk(command) => command.run(),
    };

    if let Err(err) = res {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
