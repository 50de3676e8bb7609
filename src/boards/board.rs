use anyhow::Result;

use crate::common::enums::DeviceState;

/// Chat line roles understood by [`Display::set_chat_message`].
pub mod role {
    pub const SYSTEM: &str = "system";
    pub const USER: &str = "user";
    pub const ASSISTANT: &str = "assistant";
}

pub trait Display: Send {
    fn set_status(&mut self, status: &str);
    fn set_emotion(&mut self, emotion: &str);
    fn set_chat_message(&mut self, role: &str, content: &str);
    fn show_notification(&mut self, message: &str);
    fn update_status_bar(&mut self, update_all: bool);
}

/// State indicator (LED ring, backlight colour, ...).
pub trait Led: Send {
    fn on_state_changed(&mut self, state: DeviceState);
}

/// Peripherals and platform services of one hardware board.
///
/// Handed to the application at construction; nothing looks it up globally.
pub trait Board: Send {
    fn display(&mut self) -> &mut dyn Display;
    fn led(&mut self) -> &mut dyn Led;

    /// Brings up the network. Boards that need provisioning request
    /// `WifiConfiguring` through the application handle instead of failing.
    fn start_network(&mut self) -> Result<()>;
    fn set_power_save_mode(&mut self, enabled: bool);

    fn user_agent(&self) -> String;
    fn print_heap_stats(&self);

    /// Hard restart. Does not return on hardware.
    fn restart(&mut self);
}
