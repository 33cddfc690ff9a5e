/// One TXST record to serialize. `slots` follows the nine-slot texture-set
/// convention; only the first eight have TX00..TX07 subrecords in the plugin
/// format, the ninth is mesh-side only.
#[derive(Debug, Clone, PartialEq)]
pub struct TxstRecord {
    pub form_id: u32,
    pub edid: String,
    pub slots: [String; 9],
}

#[derive(Debug, Clone, PartialEq)]
pub struct PluginDescriptor {
    pub author: String,
    pub description: String,
    pub masters: Vec<String>,
    /// ESM flag on the TES4 header ("esmify").
    pub esm: bool,
}

impl Default for PluginDescriptor {
    fn default() -> Self {
        Self {
            author: "ParallaxGen".to_string(),
            description: String::new(),
            masters: Vec::new(),
            esm: false,
        }
    }
}
