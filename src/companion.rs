/// Push side channel to a paired companion app.
pub trait CompanionLink: Send {
    /// Sends `message` to every connected client. Never blocks on slow
    /// clients.
    fn broadcast(&mut self, message: &str);
}
