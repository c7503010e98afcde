use std::fmt::Display;

use crate::errors::DebuggerError;

/// What the core hands back to the UI after processing a command.
#[derive(Debug)]
pub enum Feedback {
    Ok,
    Error(DebuggerError),
    Text(String),
    Registers(Vec<(&'static str, String)>),
    Exit(i32),
}

impl Display for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feedback::Ok => write!(f, "Ok")?,
            Feedback::Error(e) => write!(f, "Error: {e}")?,
            Feedback::Text(t) => write!(f, "{t}")?,
            Feedback::Registers(regs) => {
                for (i, (name, value)) in regs.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{name}:\t{value}")?;
                }
            }
            Feedback::Exit(code) => write!(f, "inferior exited with status {code}")?,
        }

        Ok(())
    }
}
