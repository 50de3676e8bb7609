use anyhow::Result;
use log::info;

use super::{Call, Journal};
use crate::boards::{Board, Display, Led};
use crate::common::enums::DeviceState;

struct SimDisplay {
    journal: Journal,
}

impl Display for SimDisplay {
    fn set_status(&mut self, status: &str) {
        info!(target: "display", "status: {}", status);
        self.journal.record(Call::Status(status.to_string()));
    }

    fn set_emotion(&mut self, emotion: &str) {
        info!(target: "display", "emotion: {}", emotion);
        self.journal.record(Call::Emotion(emotion.to_string()));
    }

    fn set_chat_message(&mut self, role: &str, content: &str) {
        if !content.is_empty() {
            info!(target: "display", "{}: {}", role, content);
        }
        self.journal
            .record(Call::ChatMessage(role.to_string(), content.to_string()));
    }

    fn show_notification(&mut self, message: &str) {
        info!(target: "display", "notification: {}", message);
        self.journal.record(Call::Notification(message.to_string()));
    }

    fn update_status_bar(&mut self, update_all: bool) {
        self.journal.record(Call::StatusBar(update_all));
    }
}

struct SimLed {
    journal: Journal,
}

impl Led for SimLed {
    fn on_state_changed(&mut self, state: DeviceState) {
        self.journal.record(Call::Led(state));
    }
}

/// Board with a text display and a state LED, both journaled.
pub struct SimBoard {
    journal: Journal,
    display: SimDisplay,
    led: SimLed,
}

impl SimBoard {
    pub fn new(journal: Journal) -> Self {
        Self {
            display: SimDisplay {
                journal: journal.clone(),
            },
            led: SimLed {
                journal: journal.clone(),
            },
            journal,
        }
    }
}

impl Board for SimBoard {
    fn display(&mut self) -> &mut dyn Display {
        &mut self.display
    }

    fn led(&mut self) -> &mut dyn Led {
        &mut self.led
    }

    fn start_network(&mut self) -> Result<()> {
        self.journal.record(Call::StartNetwork);
        Ok(())
    }

    fn set_power_save_mode(&mut self, enabled: bool) {
        self.journal.record(Call::PowerSave(enabled));
    }

    fn user_agent(&self) -> String {
        format!("xiaozhi-sim/{}", env!("CARGO_PKG_VERSION"))
    }

    fn print_heap_stats(&self) {
        self.journal.record(Call::HeapStats);
    }

    fn restart(&mut self) {
        info!("Board restart");
        self.journal.record(Call::Restart);
    }
}
