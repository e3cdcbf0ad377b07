use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "iptvcast", version, about = "Cast IPTV streams to DLNA televisions")]
pub struct Cli {
    /// Répertoire de configuration (défaut : $IPTVCAST_CONFIG, ./.iptvcast, ~/.iptvcast)
    #[arg(long, global = true)]
    pub config_dir: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Liste les renderers visibles sur le réseau local
    Devices {
        /// Durée d'écoute avant affichage
        #[arg(long, default_value_t = 6)]
        wait_secs: u64,
        /// Sortie JSON
        #[arg(long)]
        json: bool,
    },
    /// Interroge directement une URL de description (TV qui ignore M-SEARCH)
    Probe { location: String },
    /// Caste une liste de chaînes vers un renderer
    Cast(CastArgs),
}

#[derive(Debug, Args)]
pub struct CastArgs {
    /// Identifiant (`uuid:...`) ou nom du renderer
    #[arg(long, short)]
    pub device: String,

    /// URL de description à interroger si la TV ne répond pas au M-SEARCH
    #[arg(long)]
    pub location: Option<String>,

    /// Attente maximale de la découverte du renderer
    #[arg(long, default_value_t = 10)]
    pub wait_secs: u64,

    /// Chaînes, `NOM=URL` ou `URL` ; la première est lancée
    #[arg(required = true)]
    pub channels: Vec<String>,
}
