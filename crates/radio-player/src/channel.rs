use crate::error::PlayerError;

/// A named stream endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Channel {
    title: String,
    stream_url: String,
}

impl Channel {
    /// Build a channel, trimming both fields.
    ///
    /// Returns [`PlayerError::InvalidChannel`] when either field is empty after trimming.
    pub fn new(title: impl AsRef<str>, stream_url: impl AsRef<str>) -> Result<Self, PlayerError> {
        let title = title.as_ref().trim();
        let stream_url = stream_url.as_ref().trim();
        if title.is_empty() {
            return Err(PlayerError::InvalidChannel("title is empty".to_string()));
        }
        if stream_url.is_empty() {
            return Err(PlayerError::InvalidChannel(format!(
                "stream url for {title:?} is empty"
            )));
        }
        Ok(Self {
            title: title.to_string(),
            stream_url: stream_url.to_string(),
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }
}

/// Fixed, non-empty list of channels with wrap-around navigation.
#[derive(Clone, Debug)]
pub struct ChannelList {
    channels: Vec<Channel>,
}

impl ChannelList {
    pub fn new(channels: Vec<Channel>) -> Result<Self, PlayerError> {
        if channels.is_empty() {
            return Err(PlayerError::NoChannels);
        }
        Ok(Self { channels })
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    /// Index after `index`, wrapping from the last channel to 0.
    pub fn wrap_next(&self, index: usize) -> usize {
        (index + 1) % self.channels.len()
    }

    /// Index before `index`, wrapping from 0 to the last channel.
    pub fn wrap_previous(&self, index: usize) -> usize {
        let len = self.channels.len();
        (index % len + len - 1) % len
    }

    /// One-based position label, e.g. `3/9`.
    pub fn position_label(&self, index: usize) -> String {
        format!("{}/{}", index + 1, self.channels.len())
    }
}
