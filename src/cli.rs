//! Línea de comandos del binario.

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "cap3d_ingest",
    about = "Ingesta del dataset multivista Cap3D/Objaverse en Weaviate"
)]
pub struct Cli {
    /// Qué hacer: ingerir el catálogo o mostrar el estado de las colecciones
    #[arg(value_enum, default_value_t = Mode::Ingest)]
    pub mode: Mode,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Mode {
    /// Recorre el dataset y vuelca un vector agregado por objeto.
    Ingest,
    /// Recuentos, consulta de ejemplo y lectura de ids de muestra.
    Monitor,
}
