//! Java Card CAP archive parsing: the 13 defined components, in both
//! compact and extended (2.1-2.3) framing.
//!
//! Each submodule owns one component's byte layout. This module ties them
//! together: [`ParsedCap::parse`] reads every component out of a
//! [`crate::archive::CapComponents`] map using the header's format version
//! and `EXTENDED` flag to pick compact vs extended framing for the
//! components that vary, and retains each component's raw bytes alongside
//! its decoded form so load-time assembly never needs to re-serialize.

pub mod applet;
pub mod class;
pub mod constant_pool;
pub mod debug;
pub mod descriptor;
pub mod directory;
pub mod export;
pub mod header;
pub mod import;
pub mod method;
pub mod reader;
pub mod reference_location;
pub mod static_field;
pub mod static_resources;

pub use applet::AppletComponent;
pub use class::ClassComponent;
pub use constant_pool::ConstantPoolComponent;
pub use debug::DebugComponent;
pub use descriptor::DescriptorComponent;
pub use directory::DirectoryComponent;
pub use export::ExportComponent;
pub use header::HeaderComponent;
pub use import::ImportComponent;
pub use method::MethodComponent;
pub use reference_location::ReferenceLocationComponent;
pub use static_field::StaticFieldComponent;
pub use static_resources::StaticResourcesComponent;

use crate::archive::CapComponents;
use crate::error::GpError;

/// The 13 component kinds the format defines, plus an escape hatch for
/// vendor-specific components (tag range 128-255). Order here is purely
/// enumerative; load-file component ordering is a separate concern
/// ([`crate::agent::ComponentOrder`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Header,
    Directory,
    Applet,
    Import,
    ConstantPool,
    Class,
    Method,
    StaticField,
    ReferenceLocation,
    Export,
    Descriptor,
    Debug,
    StaticResources,
    Custom(u8),
}

impl ComponentKind {
    /// The basename stem (without `.cap`/`.capx`) a CAP archive stores this
    /// component's bytes under.
    pub const fn filename_stem(self) -> Option<&'static str> {
        match self {
            Self::Header => Some("header"),
            Self::Directory => Some("directory"),
            Self::Applet => Some("applet"),
            Self::Import => Some("import"),
            Self::ConstantPool => Some("constantpool"),
            Self::Class => Some("class"),
            Self::Method => Some("method"),
            Self::StaticField => Some("staticfield"),
            Self::ReferenceLocation => Some("reflocation"),
            Self::Export => Some("export"),
            Self::Descriptor => Some("descriptor"),
            Self::Debug => Some("debug"),
            Self::StaticResources => Some("staticresources"),
            Self::Custom(_) => None,
        }
    }
}

/// Look a component up by its filename stem, trying the compact (`.cap`)
/// extension first and falling back to the extended (`.capx`) one.
fn lookup<'a>(components: &'a CapComponents, stem: &str) -> Option<&'a [u8]> {
    components
        .get(&format!("{stem}.cap"))
        .or_else(|| components.get(&format!("{stem}.capx")))
}

fn lookup_required<'a>(components: &'a CapComponents, stem: &str) -> Result<&'a [u8], GpError> {
    lookup(components, stem).ok_or_else(|| {
        GpError::CapMalformed(format!("archive is missing mandatory component '{stem}'"))
    })
}

/// A fully decoded CAP archive: one record per component, built from the
/// component's raw bytes using the header's declared format version and
/// `EXTENDED` flag.
#[derive(Debug, Clone)]
pub struct ParsedCap {
    pub header: HeaderComponent,
    pub directory: DirectoryComponent,
    pub import: ImportComponent,
    pub applet: Option<AppletComponent>,
    pub class: ClassComponent,
    pub method: MethodComponent,
    pub static_field: StaticFieldComponent,
    pub reference_location: ReferenceLocationComponent,
    pub export: Option<ExportComponent>,
    pub descriptor: DescriptorComponent,
    pub constant_pool: ConstantPoolComponent,
    pub debug: Option<DebugComponent>,
    pub static_resources: Option<StaticResourcesComponent>,
}

impl ParsedCap {
    /// Parse every component present in `components`, honoring mandatory
    /// vs conditional presence per §3's member constraints.
    pub fn parse(components: &CapComponents) -> Result<Self, GpError> {
        let header = HeaderComponent::parse(lookup_required(components, "header")?)?;
        let is_extended = header.is_extended;
        let format = header.cap_format_version();

        let directory =
            DirectoryComponent::parse(lookup_required(components, "directory")?, is_extended, format)?;
        let import = ImportComponent::parse(lookup_required(components, "import")?)?;
        let applet = lookup(components, "applet")
            .map(|data| AppletComponent::parse(data, is_extended))
            .transpose()?;
        let class = ClassComponent::parse(lookup_required(components, "class")?, is_extended, format)?;
        let method = MethodComponent::parse(lookup_required(components, "method")?, is_extended)?;
        let static_field = StaticFieldComponent::parse(lookup_required(components, "staticfield")?)?;
        let reference_location = ReferenceLocationComponent::parse(
            lookup_required(components, "reflocation")?,
            is_extended,
        )?;
        let export = lookup(components, "export")
            .map(|data| ExportComponent::parse(data, is_extended))
            .transpose()?;
        let descriptor =
            DescriptorComponent::parse(lookup_required(components, "descriptor")?, is_extended)?;
        let constant_pool =
            ConstantPoolComponent::parse(lookup_required(components, "constantpool")?, format)?;
        let debug = lookup(components, "debug").map(DebugComponent::parse);
        let static_resources = lookup(components, "staticresources")
            .map(StaticResourcesComponent::parse)
            .transpose()?;

        Ok(Self {
            header,
            directory,
            import,
            applet,
            class,
            method,
            static_field,
            reference_location,
            export,
            descriptor,
            constant_pool,
            debug,
            static_resources,
        })
    }

    /// The package this archive defines.
    pub fn package_aid(&self) -> Option<&[u8]> {
        self.header.package().map(|p| p.aid.as_slice())
    }

    /// Every applet AID this archive installs, in declaration order.
    pub fn applet_aids(&self) -> Vec<&[u8]> {
        self.applet
            .as_ref()
            .map(|a| a.applets.iter().map(|info| info.aid.as_slice()).collect())
            .unwrap_or_default()
    }

    /// The AID/version pair of every package this archive imports.
    pub fn imported_packages(&self) -> &[header::PackageInfo] {
        &self.import.packages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use std::io::Write;
    use zip::write::{SimpleFileOptions, ZipWriter};

    fn build_archive(entries: &[(&str, Vec<u8>)]) -> CapComponents {
        let mut buf = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut buf);
            let mut writer = ZipWriter::new(cursor);
            let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
            for (name, data) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        CapComponents::read(&buf).unwrap()
    }

    fn minimal_compact_components() -> Vec<(&'static str, Vec<u8>)> {
        let mut header = vec![0x01, 0x00, 0x0B];
        header.extend_from_slice(&hex!("DECAFFED"));
        header.extend_from_slice(&[0x00, 0x01]); // format 1.0 (< 2.2, no package name)
        header.push(0x00); // flags
        header.extend_from_slice(&[0x00, 0x01, 0x07]);
        header.extend_from_slice(&hex!("A0000000030000"));

        let mut directory = vec![0x02, 0x00, 0x14];
        directory.extend_from_slice(&[0x00, 0x0E]); // header size
        directory.extend_from_slice(&[0x00, 0x00]); // directory size (self, unused by parser)
        directory.extend_from_slice(&[0x00, 0x00]); // applet size
        directory.extend_from_slice(&[0x00, 0x0A]); // import size
        directory.extend_from_slice(&[0x00, 0x04]); // constant pool size
        directory.extend_from_slice(&[0x00, 0x03]); // class size
        directory.extend_from_slice(&[0x00, 0x04]); // method size
        directory.extend_from_slice(&[0x00, 0x0D]); // static field size
        directory.extend_from_slice(&[0x00, 0x06]); // ref location size
        directory.extend_from_slice(&[0x00, 0x00]); // export size
        directory.extend_from_slice(&[0x00, 0x04]); // descriptor size
        directory.extend_from_slice(&[0x00, 0x00]); // image size
        directory.extend_from_slice(&[0x00, 0x00]); // array init count
        directory.extend_from_slice(&[0x00, 0x00]); // array init size
        directory.push(1); // import count
        directory.push(0); // applet count
        directory.push(0); // custom count

        let mut import = vec![0x04, 0x00, 0x0A, 0x01];
        import.extend_from_slice(&[0x00, 0x01, 0x07]);
        import.extend_from_slice(&hex!("A0000000620001"));

        let class = vec![0x06, 0x00, 0x00];

        let mut method = vec![0x07, 0x00, 0x02, 0x00];
        method.extend_from_slice(&[0xAA, 0xBB]);

        let mut static_field = vec![0x08, 0x00, 0x08];
        static_field.extend_from_slice(&[0x00, 0x00]); // image_size
        static_field.extend_from_slice(&[0x00, 0x00]); // reference_count
        static_field.extend_from_slice(&[0x00, 0x00]); // array_init_count
        static_field.extend_from_slice(&[0x00, 0x00]); // default_value_count
        static_field.extend_from_slice(&[0x00, 0x00]); // non_default_value_count

        let mut reference_location = vec![0x09, 0x00, 0x04];
        reference_location.extend_from_slice(&[0x00, 0x00]);
        reference_location.extend_from_slice(&[0x00, 0x00]);

        let descriptor = vec![0x0B, 0x00, 0x01, 0x00];

        let mut constant_pool = vec![0x05, 0x00, 0x02];
        constant_pool.extend_from_slice(&[0x00, 0x00]);

        vec![
            ("header.cap", header),
            ("directory.cap", directory),
            ("import.cap", import),
            ("class.cap", class),
            ("method.cap", method),
            ("staticfield.cap", static_field),
            ("reflocation.cap", reference_location),
            ("descriptor.cap", descriptor),
            ("constantpool.cap", constant_pool),
        ]
    }

    #[test]
    fn parses_minimal_mandatory_set() {
        let components = build_archive(&minimal_compact_components());
        let cap = ParsedCap::parse(&components).unwrap();
        assert_eq!(cap.package_aid(), Some(hex!("A0000000030000").as_slice()));
        assert!(cap.applet.is_none());
        assert!(cap.export.is_none());
        assert!(cap.debug.is_none());
        assert_eq!(cap.imported_packages().len(), 1);
    }

    #[test]
    fn missing_mandatory_component_is_cap_malformed() {
        let mut entries = minimal_compact_components();
        entries.retain(|(name, _)| *name != "import.cap");
        let components = build_archive(&entries);
        let err = ParsedCap::parse(&components).unwrap_err();
        assert!(matches!(err, GpError::CapMalformed(_)));
    }
}
