use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use bioprovision::ProvisionConfig;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub(crate) fn config(base: &Path) -> ProvisionConfig {
    let mut config = ProvisionConfig::new(base);
    config.request_timeout = Duration::from_secs(10);
    config
}

pub(crate) fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        for (name, data) in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }
    buf.into_inner()
}

pub(crate) fn tar_gz_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub(crate) fn tar_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

/// A tar with one entry whose name is written verbatim into the header,
/// bypassing the builder's own path checks.
pub(crate) fn tar_with_raw_name(name: &str, data: &[u8]) -> Vec<u8> {
    let mut header = tar::Header::new_gnu();
    header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append(&header, data).unwrap();
    builder.into_inner().unwrap()
}

/// Serve `body` at `route` and return the full URL.
pub(crate) async fn serve(server: &MockServer, route: &str, body: Vec<u8>) -> String {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
    format!("{}{}", server.uri(), route)
}

/// Marker file a source is expected to produce under `base`.
pub(crate) fn marker_for(base: &Path, source: &str) -> PathBuf {
    base.join("version")
        .join(format!("{}.version", source.replace('/', "_")))
}

/// True if no staging directories were left behind.
pub(crate) fn staging_is_clean(base: &Path) -> bool {
    match std::fs::read_dir(base.join(".staging")) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

/// A stand-in registry client run as `sh <script> registry model download-version <source> --dest <dest>`.
///
/// It logs every invocation to `calls.log`, refuses to run without an API
/// key, and writes one `.model` file per name in `files`.
pub(crate) struct FakeRegistry {
    pub(crate) script: PathBuf,
    pub(crate) calls: PathBuf,
}

impl FakeRegistry {
    pub(crate) fn new(dir: &Path, files: &[&str]) -> Self {
        let calls = dir.join("calls.log");
        let mut body = String::from("#!/bin/sh\nset -e\n");
        body.push_str(&format!("echo \"$4\" >> '{}'\n", calls.display()));
        body.push_str(
            "[ -n \"$NGC_CLI_API_KEY\" ] || { echo 'Error: invalid apikey' >&2; exit 1; }\n",
        );
        body.push_str("mkdir -p \"$6/model_v1.0\"\n");
        for file in files {
            body.push_str(&format!(
                "printf 'weights for %s' \"$4\" > \"$6/model_v1.0/{}\"\n",
                file
            ));
        }

        let script = dir.join("fake-registry.sh");
        std::fs::write(&script, body).unwrap();
        Self { script, calls }
    }

    pub(crate) fn configure(&self, config: &mut ProvisionConfig) {
        config.registry_program = "sh".to_string();
        config.registry_args = vec![
            self.script.to_string_lossy().to_string(),
            "registry".into(),
            "model".into(),
            "download-version".into(),
            "{source}".into(),
            "--dest".into(),
            "{dest}".into(),
        ];
    }

    pub(crate) fn call_count(&self) -> usize {
        std::fs::read_to_string(&self.calls)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }
}
