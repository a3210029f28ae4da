use crate::analyser::containers::Report;
use ansi_term::Colour;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

pub fn data_as_json(report: &Report, pretty: bool) -> serde_json::Result<String> {
    if pretty {
        serde_json::to_string_pretty(report)
    } else {
        serde_json::to_string(report)
    }
}

pub fn data_to_file(json: &str, path: &Path) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")
}

pub fn print_results(report: &Report) {
    println!("\n\u{250F}\u{2501}\u{2501}\u{2501}\u{2501} Results");
    print_overview(report);
    print_findings(report);
}

fn count(n: usize) -> ansi_term::ANSIString<'static> {
    Colour::Fixed(226).paint(n.to_string())
}

pub fn print_overview(report: &Report) {
    println!("\u{2503}");
    println!("\u{2503} Hosts            : {}", count(report.hosts.len()));
    println!("\u{2503} Domains          : {}", count(report.domains.len()));
    println!("\u{2503} TCP connections  : {}", count(report.tcp_connections.len()));
    println!("\u{2503} UDP connections  : {}", count(report.udp_connections.len()));
    println!("\u{2503} ");
}

pub fn print_findings(report: &Report) {
    for http in &report.http {
        println!("\u{2503} {} {} {}", Colour::Red.paint("HTTP"), http.method, http.uri);
    }
    for dns in &report.dns {
        let answers: Vec<&str> = dns.answers.iter().map(|a| a.data.as_str()).collect();
        println!(
            "\u{2503} {} {} {} -> [{}]",
            Colour::Red.paint("DNS"),
            dns.qtype.unwrap_or("?"),
            dns.request,
            answers.join(", ")
        );
    }
    for ssh in &report.ssh {
        println!("\u{2503} {} {} ({} -> {})", Colour::Red.paint("SSH"), ssh.description, ssh.src, ssh.dst);
    }
    for tls in &report.ssl {
        println!("\u{2503} {} {} ({} -> {})", Colour::Red.paint("SSL"), tls.description, tls.src, tls.dst);
    }
    for login in &report.stratum {
        println!(
            "\u{2503} {} user {} pass {}",
            Colour::Red.paint("STRATUM"),
            Colour::Fixed(226).paint(&login.user),
            Colour::Fixed(226).paint(&login.pass)
        );
    }
    for session in &report.smtp {
        println!("\u{2503} {} session to {} ({} bytes)", Colour::Red.paint("SMTP"), session.dest, session.payload.len());
    }
    println!("\u{2517}\u{2501}\u{2501}\u{2501}\u{2501}");
}
