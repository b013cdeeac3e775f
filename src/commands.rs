pub mod serve {
    use crate::device::Device;
    use crate::store::RegisterStore;
    use crate::telemetry::Pipeline;
    use std::sync::Arc;
    use tracing::info;

    /// Bridge EnergyHub telemetry from the MQTT broker into a SunSpec
    /// modbus register map.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        mqtt: crate::mqtt::Args,

        /// Listen for modbus clients on this address.
        #[arg(long, default_value = "0.0.0.0:502")]
        modbus_listen: std::net::SocketAddr,

        /// The register address the SunSpec map is anchored at.
        #[arg(long, default_value_t = 40000)]
        base_address: u16,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("the mqtt listener failed")]
        Mqtt(#[source] crate::mqtt::Error),
        #[error("the modbus server failed")]
        Modbus(#[source] crate::server::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;
        runtime.block_on(async move {
            let device = Device::energyhub(args.base_address);
            let store = Arc::new(RegisterStore::new(device.compose()));
            for range in store.snapshot().ranges() {
                info!(
                    model = range.model,
                    start = range.start,
                    end = range.end,
                    length = range.length,
                    "mapped a model"
                );
            }
            let pipeline = Pipeline::new(device, Arc::clone(&store));
            let mqtt = tokio::spawn(crate::mqtt::run(args.mqtt, pipeline));
            let modbus = tokio::spawn(crate::server::serve(args.modbus_listen, store));
            tokio::select! {
                result = mqtt => result.expect("the mqtt task panicked").map_err(Error::Mqtt),
                result = modbus => result.expect("the modbus task panicked").map_err(Error::Modbus),
                _ = tokio::signal::ctrl_c() => {
                    // Updates are pure in-memory work; nothing needs
                    // flushing beyond letting the tasks drop.
                    info!("interrupted, shutting down");
                    Ok(())
                }
            }
        })
    }
}

pub mod registers {
    use crate::device::Device;
    use std::path::PathBuf;

    #[derive(clap::ValueEnum, Clone, Debug)]
    pub enum Format {
        Table,
        Jsonl,
        Csv,
    }

    /// Print the register map the bridge serves.
    #[derive(clap::Parser)]
    pub struct Args {
        #[arg(long, short = 'f', value_enum, default_value_t = Format::Table)]
        format: Format,

        /// Only show points whose block, name or address contains this text.
        filter: Option<String>,

        #[arg(long, short = 'o')]
        file: Option<PathBuf>,

        /// The register address the SunSpec map is anchored at.
        #[arg(long, default_value_t = 40000)]
        base_address: u16,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not open the specified output file at {1:?}")]
        OpenOutputFile(#[source] std::io::Error, PathBuf),
        #[error("could not write data to the output file at {1:?}")]
        WriteFile(#[source] std::io::Error, PathBuf),
        #[error("could not write data to the terminal")]
        WriteStdout(#[source] std::io::Error),
        #[error("could not serialize a register row to JSON")]
        SerializeJson(#[source] serde_json::Error),
    }

    #[derive(serde::Serialize)]
    pub struct PointSchema {
        pub address: u16,
        pub block: &'static str,
        pub model: u16,
        pub point: &'static str,
        pub kind: crate::codec::DataType,
        pub words: u16,
    }

    impl PointSchema {
        /// Every point of the composed map, header words excluded, in
        /// address order.
        pub fn all_points(base_address: u16) -> Vec<Self> {
            let device = Device::energyhub(base_address);
            let image = device.compose();
            let mut points = Vec::new();
            for (model, range) in device.models().iter().zip(image.ranges()) {
                let mut address = range.start + 2;
                for field in model.fields() {
                    points.push(PointSchema {
                        address,
                        block: model.name(),
                        model: model.id(),
                        point: field.point,
                        kind: field.kind,
                        words: field.kind.words(),
                    });
                    address += field.kind.words();
                }
            }
            points
        }

        fn is_match(&self, pattern: &str) -> bool {
            let pattern = pattern.to_uppercase();
            self.point.to_uppercase().contains(&pattern)
                || self.block.to_uppercase().contains(&pattern)
                || self.address.to_string().contains(&pattern)
        }

        fn cells(&self) -> Vec<String> {
            vec![
                self.address.to_string(),
                self.block.to_string(),
                self.point.to_string(),
                self.kind.to_string(),
                self.words.to_string(),
            ]
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut output: Box<dyn std::io::Write> = match &args.file {
            None => Box::new(std::io::stdout().lock()) as Box<_>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };
        let write_error = |e| match &args.file {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.clone()),
        };

        let points = PointSchema::all_points(args.base_address);
        let points = points.iter().filter(|point| match &args.filter {
            Some(pattern) => point.is_match(pattern),
            None => true,
        });
        const HEADERS: [&str; 5] = ["Address", "Block", "Point", "Type", "Words"];
        match args.format {
            Format::Table => {
                let mut table = comfy_table::Table::new();
                table
                    .set_header(HEADERS.to_vec())
                    .set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                for point in points {
                    table.add_row(point.cells());
                }
                output.write_fmt(format_args!("{table}\n")).map_err(write_error)?;
            }
            Format::Jsonl => {
                for point in points {
                    serde_json::to_writer(&mut output, point).map_err(Error::SerializeJson)?;
                    writeln!(output).map_err(write_error)?;
                }
            }
            Format::Csv => {
                write_csv_row(&mut output, &HEADERS.map(String::from), &write_error)?;
                for point in points {
                    write_csv_row(&mut output, &point.cells(), &write_error)?;
                }
            }
        }
        output.flush().map_err(write_error)
    }

    fn write_csv_row(
        output: &mut dyn std::io::Write,
        cells: &[String],
        write_error: &dyn Fn(std::io::Error) -> Error,
    ) -> Result<(), Error> {
        let longest = cells.iter().map(|cell| cell.len()).max().unwrap_or(0);
        let mut buffer = vec![0; 2 + 2 * longest];
        let mut writer = csv_core::Writer::new();
        for (index, cell) in cells.iter().enumerate() {
            let (result, read, written) = writer.field(cell.as_bytes(), &mut buffer);
            debug_assert!(matches!(result, csv_core::WriteResult::InputEmpty));
            debug_assert_eq!(read, cell.len());
            output.write_all(&buffer[..written]).map_err(write_error)?;
            if index + 1 != cells.len() {
                let (_, written) = writer.delimiter(&mut buffer);
                output.write_all(&buffer[..written]).map_err(write_error)?;
            }
        }
        let (_, written) = writer.terminator(&mut buffer);
        output.write_all(&buffer[..written]).map_err(write_error)
    }

}
