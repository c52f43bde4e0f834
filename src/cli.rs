use clap::ValueEnum;
use std::io::IsTerminal;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayMode {
    /// Live display when stdout is a terminal, plain log lines otherwise
    Auto,
    /// Always draw the live display
    Tui,
    /// Plain log lines only
    Plain,
}

impl DisplayMode {
    pub fn is_interactive(self) -> bool {
        match self {
            DisplayMode::Auto => std::io::stdout().is_terminal(),
            DisplayMode::Tui => true,
            DisplayMode::Plain => false,
        }
    }
}
