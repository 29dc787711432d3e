//! Text commands executed through the command characteristic.
//!
//! A client writes `name arg1 arg2 ...`; [`CommandSet::dispatch`] finds the
//! command by exact name and runs it against a [`CommandContext`]. Results
//! go back through [`CommandContext::send_command_result`], which the
//! controller turns into a value update plus notification.

use core::fmt;
use std::rc::Rc;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::app::maintenance::BleMode;
use crate::app::ports::BondedDevice;

/// Names reserved for built-in commands.
pub const BUILTIN_COMMANDS: [&str; 6] = [
    "help",
    "ble-services",
    "wifi-config",
    "pairings",
    "version",
    "log-level",
];

/// What a command may touch on the controller.
pub trait CommandContext {
    fn ble_mode(&self) -> BleMode;
    fn set_ble_mode(&mut self, mode: BleMode);
    fn log_level(&self) -> u8;
    fn set_log_level(&mut self, level: u8);
    fn wifi_override_ssid(&self) -> Option<String>;
    /// Store and apply credentials. Returns a reason on rejection.
    fn set_wifi_credentials(&mut self, ssid: &str, password: &str, hidden: bool)
    -> Result<(), String>;
    /// Clear the stored override and schedule a reboot. Returns a reason
    /// when the store could not be written.
    fn clear_wifi_credentials_and_reboot(&mut self) -> Result<(), String>;
    fn bonded_devices(&self) -> Vec<BondedDevice>;
    /// Remove all bonds, returning how many were removed.
    fn clear_bonded_devices(&mut self) -> usize;
    fn build_version(&self) -> String;
    fn send_command_result(&mut self, result: &str);
    /// A sender custom commands can use to answer later.
    fn result_sender(&self) -> CommandResultSender;
}

/// Delivers a custom command's answer from any thread.
#[derive(Clone)]
pub struct CommandResultSender {
    deliver: Arc<dyn Fn(String) + Send + Sync>,
}

impl CommandResultSender {
    pub fn new(deliver: impl Fn(String) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn send(&self, result: impl Into<String>) {
        (self.deliver)(result.into());
    }
}

impl fmt::Debug for CommandResultSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CommandResultSender")
    }
}

/// External code run by a custom command.
pub type CustomCommandTrigger = Rc<dyn Fn(&[String], CommandResultSender)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    EmptyName,
    InvalidCharacter(char),
    Reserved,
    Duplicate,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "command name is empty"),
            Self::InvalidCharacter(c) => write!(f, "invalid character {:?} in command name", c),
            Self::Reserved => write!(f, "command name is a built-in command"),
            Self::Duplicate => write!(f, "command name already registered"),
        }
    }
}

/// Custom command names are `[a-z0-9-]+` and must not shadow a built-in.
pub fn validate_command_name(name: &str) -> Result<(), CommandError> {
    if name.is_empty() {
        return Err(CommandError::EmptyName);
    }
    if BUILTIN_COMMANDS.contains(&name) {
        return Err(CommandError::Reserved);
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(CommandError::InvalidCharacter(c));
    }
    Ok(())
}

#[derive(Clone)]
enum Action {
    Help,
    BleServices,
    WifiConfig,
    Pairings,
    Version,
    LogLevel,
    Custom(CustomCommandTrigger),
}

#[derive(Clone)]
pub struct Command {
    name: String,
    description: String,
    action: Action,
}

impl Command {
    fn builtin(name: &str, description: &str, action: Action) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            action,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Longer help than the description, for commands that have one.
    pub fn help_text(&self) -> Option<&'static str> {
        match self.action {
            Action::WifiConfig => Some(
                "wifi-config [<ssid> <password> [hidden] | clear]: without arguments shows the \
                 stored override; with ssid and password stores and applies it; 'clear' \
                 removes it and reboots",
            ),
            Action::Pairings => Some(
                "pairings [clear]: lists bonded devices; 'clear' removes all bonds",
            ),
            _ => None,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self.action, Action::Custom(_))
    }
}

/// Built-in plus custom commands, unique by name.
#[derive(Clone)]
pub struct CommandSet {
    commands: Vec<Command>,
}

impl CommandSet {
    pub fn with_builtins() -> Self {
        let commands = vec![
            Command::builtin("help", "show help for commands", Action::Help),
            Command::builtin(
                "ble-services",
                "ble-services on|off enables or disables the non-maintenance BLE services",
                Action::BleServices,
            ),
            Command::builtin(
                "wifi-config",
                "get, set or clear the WIFI station override",
                Action::WifiConfig,
            ),
            Command::builtin(
                "pairings",
                "list or clear bonded devices",
                Action::Pairings,
            ),
            Command::builtin("version", "show the firmware build time", Action::Version),
            Command::builtin(
                "log-level",
                "get or set log level (0=None, 4=Config, 5=Debug)",
                Action::LogLevel,
            ),
        ];
        Self { commands }
    }

    pub fn register_custom(
        &mut self,
        name: &str,
        description: &str,
        trigger: CustomCommandTrigger,
    ) -> Result<(), CommandError> {
        validate_command_name(name)?;
        if self.find(name).is_some() {
            return Err(CommandError::Duplicate);
        }
        self.commands.push(Command {
            name: name.to_string(),
            description: description.to_string(),
            action: Action::Custom(trigger),
        });
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Parse and run one request line.
    pub fn dispatch<C: CommandContext>(&self, line: &str, ctx: &mut C) {
        let mut tokens = line.split_whitespace();
        let Some(name) = tokens.next() else {
            debug!("Ignoring empty command line");
            return;
        };
        let args: Vec<String> = tokens.map(str::to_string).collect();

        let Some(command) = self.find(name) else {
            warn!("Unknown BLE command '{}'", name);
            ctx.send_command_result(&format!("Unknown BLE command '{}'", name));
            return;
        };
        info!("Executing BLE command '{}' ({} args)", name, args.len());
        self.execute(command, &args, ctx);
    }

    fn execute<C: CommandContext>(&self, command: &Command, args: &[String], ctx: &mut C) {
        match &command.action {
            Action::Help => self.help(args, ctx),
            Action::BleServices => ble_services(args, ctx),
            Action::WifiConfig => wifi_config(args, ctx),
            Action::Pairings => pairings(args, ctx),
            Action::Version => {
                let version = ctx.build_version();
                ctx.send_command_result(&version);
            }
            Action::LogLevel => log_level(args, ctx),
            Action::Custom(trigger) => trigger(args, ctx.result_sender()),
        }
    }

    fn help<C: CommandContext>(&self, args: &[String], ctx: &mut C) {
        let Some(wanted) = args.first() else {
            let mut help = String::from("Available:");
            for name in self.names() {
                help.push(' ');
                help.push_str(name);
            }
            help.push_str(", 'help <cmd>' for more.");
            ctx.send_command_result(&help);
            return;
        };
        let text = match self.find(wanted) {
            Some(command) => match command.help_text() {
                Some(text) => text.to_string(),
                None => format!("{}: {}", command.name, command.description),
            },
            None => format!("Unknown BLE command '{}'", wanted),
        };
        ctx.send_command_result(&text);
    }
}

impl Default for CommandSet {
    fn default() -> Self {
        Self::with_builtins()
    }
}

// ── Built-in command bodies ───────────────────────────────────

fn ble_services<C: CommandContext>(args: &[String], ctx: &mut C) {
    if let Some(on_or_off) = args.first() {
        let mode = if on_or_off == "off" {
            BleMode::WifiOnly
        } else {
            BleMode::Mixed
        };
        ctx.set_ble_mode(mode);
    }
    let state = if ctx.ble_mode() == BleMode::WifiOnly {
        "disabled"
    } else {
        "enabled"
    };
    ctx.send_command_result(&format!("Non-maintenance services are {}.", state));
}

fn wifi_config<C: CommandContext>(args: &[String], ctx: &mut C) {
    match args {
        [] => {
            let text = match ctx.wifi_override_ssid() {
                Some(ssid) => format!("WIFI configuration: {}", ssid),
                None => "No WIFI configuration override present.".to_string(),
            };
            ctx.send_command_result(&text);
        }
        [clear] if clear == "clear" => {
            let text = match ctx.clear_wifi_credentials_and_reboot() {
                Ok(()) => "WIFI configuration cleared, rebooting.".to_string(),
                Err(reason) => format!("WIFI configuration could not be cleared: {}.", reason),
            };
            ctx.send_command_result(&text);
        }
        [ssid, password] => store_wifi(ctx, ssid, password, false),
        [ssid, password, hidden] if hidden == "hidden" => store_wifi(ctx, ssid, password, true),
        _ => ctx.send_command_result("Invalid arguments, see 'help wifi-config'."),
    }
}

fn store_wifi<C: CommandContext>(ctx: &mut C, ssid: &str, password: &str, hidden: bool) {
    let text = match ctx.set_wifi_credentials(ssid, password, hidden) {
        Ok(()) => format!("WIFI configuration for '{}' stored.", ssid),
        Err(reason) => format!("Invalid WIFI configuration: {}.", reason),
    };
    ctx.send_command_result(&text);
}

fn pairings<C: CommandContext>(args: &[String], ctx: &mut C) {
    if args.first().is_some_and(|a| a == "clear") {
        let removed = ctx.clear_bonded_devices();
        ctx.send_command_result(&format!("Removed {} bonded device(s).", removed));
        return;
    }
    let devices = ctx.bonded_devices();
    let text = if devices.is_empty() {
        "No bonded devices.".to_string()
    } else {
        let list: Vec<String> = devices.iter().map(ToString::to_string).collect();
        format!("Bonded devices: {}", list.join(", "))
    };
    ctx.send_command_result(&text);
}

fn log_level<C: CommandContext>(args: &[String], ctx: &mut C) {
    if let Some(level) = args.first().and_then(|a| a.parse::<u8>().ok()) {
        ctx.set_log_level(level);
    }
    let text = format!("Log level is {}.", ctx.log_level());
    ctx.send_command_result(&text);
}
