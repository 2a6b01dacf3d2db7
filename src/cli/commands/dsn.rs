use crate::dbclient::conn::{connection_string, postgres_uri};

pub struct DsnArgs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub sslmode: String,
    pub uri: bool,
}

pub fn cmd_dsn(args: &DsnArgs) -> anyhow::Result<()> {
    if args.uri {
        let uri = postgres_uri(
            &args.host,
            args.port,
            &args.user,
            &args.password,
            &args.dbname,
            &args.sslmode,
        )?;
        println!("{uri}");
    } else {
        println!(
            "{}",
            connection_string(
                &args.host,
                args.port,
                &args.user,
                &args.password,
                &args.dbname,
                &args.sslmode,
            )
        );
    }
    Ok(())
}
