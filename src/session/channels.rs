//! Channel name lookup for search suggestions
//!
//! Served from channel state the session already holds; nothing here
//! touches the network.

/// A channel as known to the connected session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: u32,
    pub name: String,
}

/// Anything that can list the session's channels
pub trait ChannelSource {
    /// Current channel list, or `None` while no session is connected
    fn list_channels(&self) -> Option<Vec<Channel>>;
}

impl ChannelSource for [Channel] {
    fn list_channels(&self) -> Option<Vec<Channel>> {
        Some(self.to_vec())
    }
}

impl ChannelSource for Vec<Channel> {
    fn list_channels(&self) -> Option<Vec<Channel>> {
        Some(self.clone())
    }
}

/// One suggestion row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMatch {
    /// Position of the channel in the source list
    pub row_id: usize,
    pub name: String,
    pub id: u32,
}

/// Channels whose name contains the search terms, case-insensitively.
///
/// Terms are joined with single spaces into one query. Returns `None` when
/// the source has no channel list yet.
pub fn search_channels<S>(source: &S, terms: &[&str]) -> Option<Vec<ChannelMatch>>
where
    S: ChannelSource + ?Sized,
{
    let query = terms.join(" ").to_lowercase();
    let channels = source.list_channels()?;

    Some(
        channels
            .into_iter()
            .enumerate()
            .filter(|(_, channel)| channel.name.to_lowercase().contains(&query))
            .map(|(row_id, channel)| ChannelMatch {
                row_id,
                name: channel.name,
                id: channel.id,
            })
            .collect(),
    )
}
