/// Backend endpoints. Templates are relative to `<backend>/api/` and use
/// positional `{n}` placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    ModelList,
    ModelImport,
    MeasurementList,
    DeviceTypeData,
    MeasurementData,
    DeviceData,
    DeviceTypeImport,
    DeviceTypeExport,
    MeasurementImport,
    MeasurementExport,
    ModelTypes,
    BuildModel,
    TrainModel,
    TestModel,
    ApplyModel,
    JobList,
    JobResult,
    JobAttribute,
    JobAttributeByDevice,
    JobModelMapping,
}

impl Endpoint {
    pub const fn template(self) -> &'static str {
        match self {
            Endpoint::ModelList => "metadata/database/models",
            Endpoint::ModelImport => "import/database/{0}",
            Endpoint::MeasurementList => "metadata/timeseries/models",
            Endpoint::DeviceTypeData => "timeseries/{0}/{1}",
            Endpoint::MeasurementData => "timeseries/{0}/{1}/{2}",
            Endpoint::DeviceData => "timeseries/{0}/{1}/{2}/{3}",
            Endpoint::DeviceTypeImport => "import/timeseries/{0}/{1}",
            Endpoint::DeviceTypeExport => "export/timeseries/{0}/{1}",
            Endpoint::MeasurementImport => "import/timeseries/{0}/{1}/{2}",
            Endpoint::MeasurementExport => "export/timeseries/{0}/{1}/{2}",
            Endpoint::ModelTypes => "models/{0}",
            Endpoint::BuildModel => "models/{0}/{1}/build",
            Endpoint::TrainModel => "models/{0}/{1}/train",
            Endpoint::TestModel => "models/{0}/{1}/test",
            Endpoint::ApplyModel => "models/{0}/{1}/apply",
            Endpoint::JobList => "results/{0}",
            Endpoint::JobResult => "results/{0}/{1}",
            Endpoint::JobAttribute => "results/{0}/{1}/{2}",
            Endpoint::JobAttributeByDevice => "results/{0}/{1}/{2}/{3}/{4}/{5}",
            Endpoint::JobModelMapping => "results/{0}/{1}/models",
        }
    }
}

/// Substitutes `{n}` with `args[n]`. Placeholders without a matching argument
/// stay in the output verbatim.
pub fn format_template(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let digits = tail.bytes().take_while(u8::is_ascii_digit).count();

        if digits > 0 && tail[digits..].starts_with('}') {
            let arg = tail[..digits]
                .parse::<usize>()
                .ok()
                .and_then(|idx| args.get(idx));
            match arg {
                Some(arg) => out.push_str(arg),
                None => {
                    out.push('{');
                    out.push_str(&tail[..=digits]);
                }
            }
            rest = &tail[digits + 1..];
        } else {
            out.push('{');
            rest = tail;
        }
    }

    out.push_str(rest);
    out
}
