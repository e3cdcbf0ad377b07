//! Catalogue de chaînes vu par le contrôleur.
//!
//! L'application fournit ses chaînes ; le contrôleur n'a besoin que de
//! retrouver une chaîne par son nom et de passer à la voisine.

use crate::model::{Channel, SwitchDirection};

pub trait ChannelCatalog: Send + Sync {
    fn resolve(&self, name: &str) -> Option<Channel>;

    /// Chaîne suivante ou précédente, en bouclant aux extrémités
    fn neighbour(&self, current: &str, direction: SwitchDirection) -> Option<Channel>;
}

/// Liste ordonnée de chaînes
#[derive(Debug, Clone, Default)]
pub struct ChannelList {
    channels: Vec<Channel>,
}

impl ChannelList {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self { channels }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.name == name)
    }
}

impl FromIterator<Channel> for ChannelList {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl ChannelCatalog for ChannelList {
    fn resolve(&self, name: &str) -> Option<Channel> {
        self.position(name).map(|i| self.channels[i].clone())
    }

    fn neighbour(&self, current: &str, direction: SwitchDirection) -> Option<Channel> {
        let index = self.position(current)?;
        let len = self.channels.len();
        let next = match direction {
            SwitchDirection::Next => (index + 1) % len,
            SwitchDirection::Previous => (index + len - 1) % len,
        };
        Some(self.channels[next].clone())
    }
}
