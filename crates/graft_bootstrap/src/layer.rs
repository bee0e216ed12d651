//! Layers and class load requests.
//!
//! Each compiled unit of the platform lives in its own layer. A class is only
//! visible to a requester whose layer is allowed to see the layer the class
//! was found in; bootstrap code in particular never sees host classes.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The layer a class belongs to or a request originates from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// Runs before any host class exists; hook installation and config
    Bootstrap,
    /// Class loader lifecycle, definition discovery and planning
    Launch,
    /// Accessor facade interfaces
    Accessor,
    /// Mixin classes
    Transformer,
    /// The host application's own classes
    Host,
}

impl Layer {
    /// All layers in search order.
    pub const ALL: [Layer; 5] = [
        Layer::Bootstrap,
        Layer::Launch,
        Layer::Accessor,
        Layer::Transformer,
        Layer::Host,
    ];

    /// Whether code in `self` may resolve classes that live in `other`.
    pub fn can_see(self, other: Layer) -> bool {
        use Layer::{Accessor, Bootstrap, Host, Launch, Transformer};
        match self {
            Bootstrap => other == Bootstrap,
            Launch => matches!(other, Bootstrap | Launch | Host),
            Accessor => matches!(other, Bootstrap | Launch | Accessor | Host),
            Transformer => true,
            Host => matches!(other, Launch | Accessor | Transformer | Host),
        }
    }

    /// Whether classes of this layer pass through the installed hook.
    ///
    /// Bootstrap classes form the hook's own closure and are defined as-is.
    pub fn is_transformable(self) -> bool {
        self != Layer::Bootstrap
    }
}

/// A single class load request. Lives for one load operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassLoadRequest {
    /// Internal name of the requested class
    pub name: String,
    /// Layer of the code asking for the class
    pub requester: Layer,
}

impl ClassLoadRequest {
    pub fn new(name: impl Into<String>, requester: Layer) -> Self {
        Self {
            name: name.into(),
            requester,
        }
    }
}
