use dialoguer::BasicHistory;
use tracing::{error, info, trace, warn};

use super::{DebuggerUI, Status};
use crate::addr::VirtAddr;
use crate::errors::Result;
use crate::feedback::Feedback;
use crate::inferior::SyscallCatchPolicy;
use crate::parse::{parse_fixed_vector, parse_vector, to_float, to_integral};
use crate::register_info::{register_info_by_name, RegisterFormat, RegisterInfo};
use crate::registers::RegisterValue;
use crate::stoppoint::{StoppointId, StoppointMode};
use crate::syscalls::syscall_name_to_id;

pub struct CliUi {
    buf: String,
    buf_preparsed: Vec<String>,
    history: BasicHistory,
}

impl CliUi {
    pub fn build() -> Result<Self> {
        let ui = CliUi {
            buf_preparsed: Vec::new(),
            buf: String::new(),
            history: BasicHistory::new(),
        };
        Ok(ui)
    }

    pub fn get_input(&mut self) -> Result<()> {
        self.buf = dialoguer::Input::with_theme(&dialoguer::theme::ColorfulTheme::default())
            .with_prompt("burrow")
            .history_with(&mut self.history)
            .interact_text()?;
        trace!("processing '{}'", self.buf);
        self.buf_preparsed = self.buf.split_whitespace().map(|a| a.to_string()).collect();
        Ok(())
    }
}

impl DebuggerUI for CliUi {
    fn process(&mut self, feedback: &Feedback) -> Result<Status> {
        match feedback {
            Feedback::Error(e) => warn!("{e}"),
            Feedback::Ok => (),
            other => info!("\n{other}"),
        }

        loop {
            self.get_input()?;
            if self.buf_preparsed.is_empty() {
                continue;
            }

            match self.parse_command() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => continue,
                Err(e) => {
                    error!("{e}");
                    continue;
                }
            }
        }
    }
}

impl CliUi {
    /// One parsed command, `None` when only help was printed.
    fn parse_command(&self) -> Result<Option<Status>> {
        let args = &self.buf_preparsed;
        let command = &args[0];

        if is_prefix(command, "continue") {
            Ok(Some(Status::Continue))
        } else if is_prefix(command, "step") {
            Ok(Some(Status::StepInstruction))
        } else if is_prefix(command, "register") {
            self.parse_register_command(args)
        } else if is_prefix(command, "memory") {
            self.parse_memory_command(args)
        } else if is_prefix(command, "breakpoint") {
            self.parse_breakpoint_command(args)
        } else if is_prefix(command, "watchpoint") {
            self.parse_watchpoint_command(args)
        } else if is_prefix(command, "catchpoint") {
            self.parse_catchpoint_command(args)
        } else if is_prefix(command, "disassemble") {
            self.parse_disassemble_command(args)
        } else if is_prefix(command, "help") {
            print_help(args);
            Ok(None)
        } else if is_prefix(command, "quit") || command == "q" {
            Ok(Some(Status::DebuggerQuit))
        } else {
            error!("unknown command, try help");
            Ok(None)
        }
    }

    fn parse_register_command(&self, args: &[String]) -> Result<Option<Status>> {
        if args.len() < 2 {
            print_help(&help_args("register"));
            return Ok(None);
        }

        if is_prefix(&args[1], "read") {
            return Ok(Some(match args.get(2).map(String::as_str) {
                None => Status::RegisterRead(None),
                Some("all") => Status::RegisterReadAll,
                Some(name) => Status::RegisterRead(Some(register_info_by_name(name)?.id)),
            }));
        }

        if is_prefix(&args[1], "write") {
            if args.len() != 4 {
                print_help(&help_args("register"));
                return Ok(None);
            }
            let info = register_info_by_name(&args[2])?;
            let value = parse_register_value(info, &args[3])?;
            return Ok(Some(Status::RegisterWrite(info.id, value)));
        }

        print_help(&help_args("register"));
        Ok(None)
    }

    fn parse_memory_command(&self, args: &[String]) -> Result<Option<Status>> {
        if args.len() < 3 {
            print_help(&help_args("memory"));
            return Ok(None);
        }

        let address = VirtAddr::new(to_integral::<u64>(&args[2], 16)?);

        if is_prefix(&args[1], "read") {
            let n_bytes = match args.get(3) {
                Some(n) => to_integral::<usize>(n, 10)?,
                None => 32,
            };
            return Ok(Some(Status::MemoryRead(address, n_bytes)));
        }

        if is_prefix(&args[1], "write") {
            if args.len() != 4 {
                print_help(&help_args("memory"));
                return Ok(None);
            }
            let data = parse_vector(&args[3])?;
            return Ok(Some(Status::MemoryWrite(address, data)));
        }

        print_help(&help_args("memory"));
        Ok(None)
    }

    fn parse_breakpoint_command(&self, args: &[String]) -> Result<Option<Status>> {
        if args.len() < 2 {
            print_help(&help_args("breakpoint"));
            return Ok(None);
        }

        let command = &args[1];
        if is_prefix(command, "list") {
            return Ok(Some(Status::BreakpointList));
        }

        if args.len() < 3 {
            print_help(&help_args("breakpoint"));
            return Ok(None);
        }

        if is_prefix(command, "set") {
            let address = VirtAddr::new(to_integral::<u64>(&args[2], 16)?);
            let hardware = args.get(3).is_some_and(|flag| flag == "-h");
            return Ok(Some(Status::BreakpointSet(address, hardware)));
        }

        let id: StoppointId = to_integral(&args[2], 10)?;
        if is_prefix(command, "enable") {
            Ok(Some(Status::BreakpointEnable(id)))
        } else if is_prefix(command, "disable") {
            Ok(Some(Status::BreakpointDisable(id)))
        } else if is_prefix(command, "delete") {
            Ok(Some(Status::BreakpointDelete(id)))
        } else {
            print_help(&help_args("breakpoint"));
            Ok(None)
        }
    }

    fn parse_watchpoint_command(&self, args: &[String]) -> Result<Option<Status>> {
        if args.len() < 2 {
            print_help(&help_args("watchpoint"));
            return Ok(None);
        }

        let command = &args[1];
        if is_prefix(command, "list") {
            return Ok(Some(Status::WatchpointList));
        }

        if is_prefix(command, "set") {
            if args.len() != 5 {
                print_help(&help_args("watchpoint"));
                return Ok(None);
            }
            let address = VirtAddr::new(to_integral::<u64>(&args[2], 16)?);
            let mode = parse_stoppoint_mode(&args[3])?;
            let size = to_integral::<usize>(&args[4], 10)?;
            return Ok(Some(Status::WatchpointSet(address, mode, size)));
        }

        if args.len() < 3 {
            print_help(&help_args("watchpoint"));
            return Ok(None);
        }

        let id: StoppointId = to_integral(&args[2], 10)?;
        if is_prefix(command, "enable") {
            Ok(Some(Status::WatchpointEnable(id)))
        } else if is_prefix(command, "disable") {
            Ok(Some(Status::WatchpointDisable(id)))
        } else if is_prefix(command, "delete") {
            Ok(Some(Status::WatchpointDelete(id)))
        } else {
            print_help(&help_args("watchpoint"));
            Ok(None)
        }
    }

    fn parse_catchpoint_command(&self, args: &[String]) -> Result<Option<Status>> {
        if args.len() < 2 || !is_prefix(&args[1], "syscall") {
            print_help(&help_args("catchpoint"));
            return Ok(None);
        }

        let policy = match args.get(2).map(String::as_str) {
            None | Some("all") => SyscallCatchPolicy::All,
            Some("none") => SyscallCatchPolicy::None,
            Some(list) => {
                let to_catch = list
                    .split(',')
                    .map(syscall_name_to_id)
                    .collect::<Result<Vec<_>>>()?;
                SyscallCatchPolicy::Some(to_catch)
            }
        };
        Ok(Some(Status::CatchSyscalls(policy)))
    }

    fn parse_disassemble_command(&self, args: &[String]) -> Result<Option<Status>> {
        let address = match args.get(1) {
            Some(text) => Some(VirtAddr::new(to_integral::<u64>(text, 16)?)),
            None => None,
        };
        let n_instructions = match args.get(2) {
            Some(n) => to_integral::<usize>(n, 10)?,
            None => 5,
        };
        Ok(Some(Status::Disassemble(address, n_instructions)))
    }
}

/// Whether `text` is a prefix of the full command word `of`.
fn is_prefix(text: &str, of: &str) -> bool {
    !text.is_empty() && of.starts_with(text)
}

fn parse_stoppoint_mode(text: &str) -> Result<StoppointMode> {
    match text {
        "write" | "w" => Ok(StoppointMode::Write),
        "rw" => Ok(StoppointMode::ReadWrite),
        "execute" | "x" => Ok(StoppointMode::Execute),
        other => Err(crate::errors::DebuggerError::Parse(format!(
            "unknown watchpoint mode: {other} (expected write, rw or execute)"
        ))),
    }
}

/// Parses a value literal according to the target register's format.
fn parse_register_value(info: &RegisterInfo, text: &str) -> Result<RegisterValue> {
    match info.format {
        RegisterFormat::Uint => Ok(match info.size {
            1 => RegisterValue::U8(to_integral(text, 16)?),
            2 => RegisterValue::U16(to_integral(text, 16)?),
            4 => RegisterValue::U32(to_integral(text, 16)?),
            _ => RegisterValue::U64(to_integral(text, 16)?),
        }),
        RegisterFormat::DoubleFloat | RegisterFormat::LongDouble => {
            Ok(RegisterValue::F64(to_float(text)?))
        }
        RegisterFormat::Vector => {
            if info.size == 8 {
                Ok(RegisterValue::Byte64(parse_fixed_vector::<8>(text)?))
            } else {
                Ok(RegisterValue::Byte128(parse_fixed_vector::<16>(text)?))
            }
        }
    }
}

fn help_args(topic: &str) -> Vec<String> {
    vec!["help".to_string(), topic.to_string()]
}

fn print_help(args: &[String]) {
    if args.len() == 1 {
        eprintln!(
            r"Available commands:
breakpoint  - Commands for operating on breakpoints
catchpoint  - Commands for catching syscalls
continue    - Resume the process
disassemble - Disassemble machine code
memory      - Commands for operating on memory
register    - Commands for operating on registers
step        - Step over a single instruction
watchpoint  - Commands for operating on watchpoints
quit        - Leave the debugger"
        );
    } else if is_prefix(&args[1], "register") {
        eprintln!(
            r"Available commands:
read
read <register>
read all
write <register> <value>"
        );
    } else if is_prefix(&args[1], "breakpoint") {
        eprintln!(
            r"Available commands:
list
delete <id>
disable <id>
enable <id>
set <address> [-h]"
        );
    } else if is_prefix(&args[1], "watchpoint") {
        eprintln!(
            r"Available commands:
list
delete <id>
disable <id>
enable <id>
set <address> <write|rw|execute> <size>"
        );
    } else if is_prefix(&args[1], "memory") {
        eprintln!(
            r"Available commands:
read <address>
read <address> <number of bytes>
write <address> <bytes>"
        );
    } else if is_prefix(&args[1], "catchpoint") {
        eprintln!(
            r"Available commands:
syscall
syscall none
syscall <name1,name2,...>"
        );
    } else if is_prefix(&args[1], "disassemble") {
        eprintln!(
            r"Available commands:
disassemble [address] [instruction count]"
        );
    } else {
        eprintln!("no help available on that");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::register_info::register_info_by_name;

    #[test]
    fn test_is_prefix() {
        assert!(is_prefix("mem", "memory"));
        assert!(is_prefix("memory", "memory"));
        assert!(!is_prefix("memoryx", "memory"));
        assert!(!is_prefix("", "memory"));
    }

    #[test]
    fn test_parse_register_value_uint() {
        let rsi = register_info_by_name("rsi").unwrap();
        assert_eq!(
            parse_register_value(rsi, "0xcafecafe").unwrap(),
            RegisterValue::U64(0xcafe_cafe)
        );
    }

    #[test]
    fn test_parse_register_value_vector() {
        let mm0 = register_info_by_name("mm0").unwrap();
        let value =
            parse_register_value(mm0, "[0x11,0xba,0x5e,0xba,0x00,0x00,0x00,0x00]").unwrap();
        assert_eq!(
            value,
            RegisterValue::Byte64([0x11, 0xba, 0x5e, 0xba, 0, 0, 0, 0])
        );
    }

    #[test]
    fn test_parse_register_value_float() {
        let st0 = register_info_by_name("st0").unwrap();
        assert_eq!(
            parse_register_value(st0, "42.24").unwrap(),
            RegisterValue::F64(42.24)
        );
    }

    #[test]
    fn test_parse_stoppoint_mode() {
        assert_eq!(parse_stoppoint_mode("rw").unwrap(), StoppointMode::ReadWrite);
        assert_eq!(parse_stoppoint_mode("w").unwrap(), StoppointMode::Write);
        assert!(parse_stoppoint_mode("zz").is_err());
    }
}
