/// Substring denylist applied to recognized speech before it is displayed.
#[derive(Clone, Debug, Default)]
pub struct ContentFilter {
    phrases: Vec<String>,
}

impl ContentFilter {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(Into::into)
                .filter(|phrase: &String| !phrase.is_empty())
                .collect(),
        }
    }

    /// Returns the first denylisted phrase contained in `text`.
    pub fn blocked_by(&self, text: &str) -> Option<&str> {
        self.phrases
            .iter()
            .find(|phrase| text.contains(phrase.as_str()))
            .map(String::as_str)
    }
}
