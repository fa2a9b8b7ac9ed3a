mod cli;
mod commands;
mod env_loader;
mod error;
mod harvest;
mod logging;
mod webdriver;

fn main() {
    env_loader::load_dotenv();

    if let Err(err) = cli::run() {
        let class = error::exit_class_for(&err);
        eprintln!("error[{}]: {err:#}", class.as_str());
        std::process::exit(class.code());
    }
}
