mod play;

use std::process::ExitCode;

use structopt::StructOpt;

#[derive(StructOpt)]
enum Opt {
    /// Play a test tone through the audio sink
    Play(play::PlayOpt),
}

fn main() -> Result<(), ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opt = Opt::from_args();

    let result = match opt {
        Opt::Play(opt) => play::run(opt),
    };

    result.map_err(|err| {
        eprintln!("error: {err}");
        ExitCode::FAILURE
    })
}
