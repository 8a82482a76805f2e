//! `dotnet test` console logger output

use super::{substring_status, StatusMap};

/// Any line naming a `Kiota.*` test
pub fn parse_kiota(log: &str) -> StatusMap {
    let re = regex!(r"(?i)(Kiota\.[\w.]+)\s+");
    let mut map = StatusMap::new();
    for line in log.lines() {
        if let Some(caps) = re.captures(line) {
            map.record(&caps[1], substring_status(line));
        }
    }
    map
}

/// `  Passed OpenRA.Test.Name [12 ms]`
pub fn parse_openra(log: &str) -> StatusMap {
    let re = regex!(r"(?i)\s+\w+\s+(.*?)\s+\[\d+\s+ms\]$");
    let mut map = StatusMap::new();
    for line in log.lines() {
        if let Some(caps) = re.captures(line) {
            map.record(&caps[1], substring_status(line));
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::TestStatus;

    #[test]
    fn test_kiota() {
        let log = "\
  Passed Kiota.Builder.Tests.KiotaBuilderTests.ParsesEnum [3 ms]
  Failed Kiota.Builder.Tests.KiotaBuilderTests.Writes [1 s]
  Skipped Kiota.Builder.Tests.Slow [1 ms]
Build succeeded.
";
        let map = parse_kiota(log);
        assert_eq!(
            map.get("Kiota.Builder.Tests.KiotaBuilderTests.ParsesEnum"),
            Some(TestStatus::Passed)
        );
        assert_eq!(
            map.get("Kiota.Builder.Tests.KiotaBuilderTests.Writes"),
            Some(TestStatus::Failed)
        );
        assert_eq!(map.get("Kiota.Builder.Tests.Slow"), Some(TestStatus::Skipped));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_openra() {
        let log = "\
  Passed OpenRA.Test.OrderTest.SerializesOrder [12 ms]
  Failed OpenRA.Test.MapTest.LoadsMap [3 ms]
  Passed OpenRA.Test.Slow [1 s]
";
        let map = parse_openra(log);
        assert_eq!(
            map.get("OpenRA.Test.OrderTest.SerializesOrder"),
            Some(TestStatus::Passed)
        );
        assert_eq!(
            map.get("OpenRA.Test.MapTest.LoadsMap"),
            Some(TestStatus::Failed)
        );
        assert_eq!(map.len(), 2);
    }
}
