// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::time::SystemTime;

use clap::Parser;
use eyre::Report;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use termimad::{MadSkin, crossterm::style::Color};
use tracing::{error, info};
use waitq_common::model::WorldState;
use waitq_common::tracing::init_tracing_simple;

use crate::args::Args;
use crate::shell::{Console, Outcome};

mod args;
mod shell;

fn create_skin() -> MadSkin {
    let mut skin = MadSkin::default();
    skin.set_headers_fg(Color::Yellow);
    skin.bold.set_fg(Color::Cyan);
    skin.italic.set_fg(Color::Green);
    skin
}

fn print_help() {
    let markdown = r#"# Command queue console

|Command|Description|
|---|---|
|`think TEXT`|Tell yourself something|
|`@pemit OBJ=TEXT`|Tell someone else something|
|`@setq N=TEXT`|Set a scratch register|
|`@wait[/until] SECS=CMD`|Run a command later|
|`@wait OBJ[/ATTR or /SECS]=CMD`|Run a command when a semaphore is notified|
|`@notify[/all,/drain,/quiet] OBJ[/ATTR][=N]`|Release waiters|
|`@halt[/all] [TARGET]`|Cancel queued commands|
|`@ps[/brief,/summary,/long,/all] [TARGET]`|List queued commands|
|`@queue/kick N`, `@queue/warp SECS`|Push the queue along|
|`@create[/player] NAME`|Make a thing or a player|
|`@as OBJ CMD`|Run a command as something you own|
|`@money [AMOUNT]`|Show or set your balance|
|`:tick [SECS]`|Jump the clock forward and run what is due|
|`help, ?`|Show this help|
|`:quit`|Leave|
"#;
    println!("{}", create_skin().term_text(markdown));
}

fn repl(console: &mut Console, mut rl: DefaultEditor) -> Result<(), Report> {
    let skin = create_skin();
    let intro = format!(
        "# Command queue console\n*Acting as `{}`*\n\nType `help` for commands or `:quit` to leave.\n",
        console.world().name_of(&console.player())
    );
    println!("{}", skin.term_text(&intro));

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    console.catch_up(SystemTime::now());
                } else if line == "help" || line == "?" {
                    print_help();
                    continue;
                } else {
                    rl.add_history_entry(line)?;
                    if console.handle_line(line) == Outcome::Quit {
                        break;
                    }
                    console.catch_up(SystemTime::now());
                }
                for output in console.drain_output() {
                    println!("{output}");
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C - use ':quit' to exit");
            }
            Err(ReadlineError::Eof) => {
                println!("EOF - exiting");
                break;
            }
            Err(err) => {
                error!("Error reading line: {:?}", err);
                break;
            }
        }
    }
    Ok(())
}

fn main() -> Result<(), Report> {
    color_eyre::install()?;
    let args = Args::parse();
    init_tracing_simple(args.debug)?;

    let config = args.load_config()?;
    info!(queue = ?config.queue, "Loaded configuration");

    let mut console = Console::new(config, &args.player, SystemTime::now());
    let rl = DefaultEditor::new()?;
    let result = repl(&mut console, rl);
    info!(
        pending = console.queue().pending_commands(),
        "Shutting down..."
    );
    result
}
